use sea_orm::sea_query::Expr;
use serde::Deserialize;

use crate::{
  entity::{
    OrderStatus,
    order::{self, CartSelection, LineItem, LineItems},
    user,
  },
  prelude::*,
  sv::{
    Referral,
    tier::referral_discount_rate,
    wechat::{Gateway, PayParams, PaymentIntent},
  },
  utils::BPS,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Checkout {
  pub items: Vec<LineItem>,
  /// Falls back to the code the user onboarded with.
  #[serde(default)]
  pub referral_code: Option<String>,
  /// Cart rows to clear once the order is paid.
  #[serde(default)]
  pub cart_items: Vec<String>,
}

/// Outcome of applying a gateway payment confirmation to an order.
#[derive(Debug, Clone)]
pub enum Payment {
  /// The order moved from pending to paid.
  Applied(order::Model),
  /// The order was already paid, nothing changed.
  Duplicate(order::Model),
}

pub struct Order<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Order<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn by_id(&self, id: &str) -> Result<order::Model> {
    order::Entity::find_by_id(id)
      .one(self.db)
      .await?
      .ok_or(Error::OrderNotFound)
  }

  pub async fn checkout(
    &self,
    user_id: &str,
    checkout: Checkout,
  ) -> Result<order::Model> {
    if checkout.items.is_empty() {
      return Err(Error::InvalidArgs("order has no items".into()));
    }
    if checkout.items.iter().any(|i| i.quantity <= 0 || i.unit_price < 0) {
      return Err(Error::InvalidArgs("invalid item quantity or price".into()));
    }

    let subtotal: i64 = checkout.items.iter().map(LineItem::amount).sum();
    if subtotal <= 0 {
      return Err(Error::InvalidArgs("order total must be positive".into()));
    }

    let user = user::Entity::find_by_id(user_id)
      .one(self.db)
      .await?
      .ok_or(Error::UserNotFound)?;

    let code = checkout
      .referral_code
      .filter(|c| !c.trim().is_empty())
      .or_else(|| user.referred_by.clone());

    let mut referrer = None;
    if let Some(code) = &code {
      match Referral::owner_of(self.db, code).await? {
        Some(owner) if owner.open_id != user.open_id => referrer = Some(owner),
        Some(_) => debug!("{user_id} tried to use their own referral code"),
        None => warn!("unknown referral code {code} at checkout, ignored"),
      }
    }

    let rate = match &referrer {
      Some(owner) if !user.has_used_referral_discount => {
        referral_discount_rate(owner.agent_level)
      }
      _ => 0,
    };

    let total = (subtotal * (BPS - rate) / BPS).max(1);
    let discount = subtotal - total;

    let now = now();
    let order = order::ActiveModel {
      id: Set(uuid::Uuid::new_v4().simple().to_string()),
      user_id: Set(user_id.to_string()),
      items: Set(LineItems(checkout.items)),
      cart_items: Set(CartSelection(checkout.cart_items)),
      subtotal: Set(subtotal),
      discount_rate: Set(rate as i32),
      discount: Set(discount),
      total: Set(total),
      status: Set(OrderStatus::Pending),
      referral_code: Set(
        referrer.as_ref().and(code.map(|c| c.trim().to_uppercase())),
      ),
      referrer_id: Set(referrer.map(|r| r.open_id)),
      transaction_id: Set(None),
      paid_at: Set(None),
      settled_at: Set(None),
      created_at: Set(now),
      updated_at: Set(now),
    }
    .insert(self.db)
    .await?;

    info!(
      "order {} created for {user_id}: subtotal {} discount {} total {}",
      order.id, order.subtotal, order.discount, order.total
    );

    Ok(order)
  }

  /// Registers the order with the gateway and returns the client-side
  /// payment parameters. Only the buyer can pay for an order.
  pub async fn prepay(
    &self,
    gateway: &dyn Gateway,
    order_id: &str,
    payer: &str,
  ) -> Result<PayParams> {
    let order = self.by_id(order_id).await?;
    if order.user_id != payer {
      return Err(Error::OrderNotFound);
    }
    if order.status != OrderStatus::Pending {
      return Err(Error::InvalidTransition {
        entity: "order",
        from: order.status.as_str(),
        to: OrderStatus::Paid.as_str(),
      });
    }

    let intent = PaymentIntent {
      out_trade_no: order.id.clone(),
      description: format!("Wordcard order {}", order.id),
      amount: order.total.max(1),
      payer_open_id: order.user_id.clone(),
    };

    gateway.prepay(&intent).await
  }

  /// Moves a pending order to paid. Safe to call repeatedly with the same
  /// confirmation.
  pub async fn mark_paid<C: ConnectionTrait>(
    conn: &C,
    order_id: &str,
    transaction_id: &str,
  ) -> Result<Payment> {
    let now = now();
    let res = order::Entity::update_many()
      .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
      .col_expr(order::Column::TransactionId, Expr::value(transaction_id))
      .col_expr(order::Column::PaidAt, Expr::value(now))
      .col_expr(order::Column::UpdatedAt, Expr::value(now))
      .filter(order::Column::Id.eq(order_id))
      .filter(order::Column::Status.eq(OrderStatus::Pending))
      .exec(conn)
      .await;

    let res = match res {
      Ok(res) => res,
      Err(err) if Error::is_conflict(&err) => {
        error!(
          "transaction {transaction_id} for order {order_id} already settles \
           another order"
        );
        return Err(Error::InvalidTransition {
          entity: "order",
          from: OrderStatus::Pending.as_str(),
          to: OrderStatus::Paid.as_str(),
        });
      }
      Err(err) => return Err(err.into()),
    };

    let order = order::Entity::find_by_id(order_id)
      .one(conn)
      .await?
      .ok_or(Error::OrderNotFound)?;

    if res.rows_affected == 1 {
      info!("order {order_id} paid by transaction {transaction_id}");
      return Ok(Payment::Applied(order));
    }

    match order.status {
      OrderStatus::Paid | OrderStatus::Completed => {
        if order.transaction_id.as_deref() != Some(transaction_id) {
          error!(
            "order {order_id} already paid by {:?}, got {transaction_id}",
            order.transaction_id
          );
        }
        Ok(Payment::Duplicate(order))
      }
      status => Err(Error::InvalidTransition {
        entity: "order",
        from: status.as_str(),
        to: OrderStatus::Paid.as_str(),
      }),
    }
  }

  /// Flags the post-payment work of a paid order as done.
  pub async fn mark_settled<C: ConnectionTrait>(
    conn: &C,
    order_id: &str,
  ) -> Result<()> {
    order::Entity::update_many()
      .col_expr(order::Column::SettledAt, Expr::value(now()))
      .filter(order::Column::Id.eq(order_id))
      .filter(order::Column::SettledAt.is_null())
      .exec(conn)
      .await?;
    Ok(())
  }

  /// Paid orders whose post-payment work never finished, paid before
  /// `cutoff`.
  pub async fn unsettled(&self, cutoff: DateTime) -> Result<Vec<order::Model>> {
    let orders = order::Entity::find()
      .filter(
        order::Column::Status
          .is_in([OrderStatus::Paid, OrderStatus::Completed]),
      )
      .filter(order::Column::SettledAt.is_null())
      .filter(order::Column::PaidAt.lt(cutoff))
      .order_by_asc(order::Column::PaidAt)
      .limit(100)
      .all(self.db)
      .await?;
    Ok(orders)
  }

  pub async fn complete(&self, order_id: &str) -> Result<order::Model> {
    self.transition(order_id, OrderStatus::Paid, OrderStatus::Completed).await
  }

  pub async fn cancel(&self, order_id: &str) -> Result<order::Model> {
    self.transition(order_id, OrderStatus::Pending, OrderStatus::Cancelled).await
  }

  async fn transition(
    &self,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
  ) -> Result<order::Model> {
    let res = order::Entity::update_many()
      .col_expr(order::Column::Status, Expr::value(to))
      .col_expr(order::Column::UpdatedAt, Expr::value(now()))
      .filter(order::Column::Id.eq(order_id))
      .filter(order::Column::Status.eq(from))
      .exec(self.db)
      .await?;

    let order = self.by_id(order_id).await?;
    if res.rows_affected == 0 && order.status != to {
      return Err(Error::InvalidTransition {
        entity: "order",
        from: order.status.as_str(),
        to: to.as_str(),
      });
    }

    Ok(order)
  }
}
