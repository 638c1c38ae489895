//! Applies verified gateway notifications to orders and withdrawals.
//!
//! The primary transition (order paid, withdrawal moved) is authoritative
//! and must succeed for the notification to be acknowledged. Side effects
//! that follow it run under their own time limit, and failures only log and
//! land in the failure ledger. A paid order stays unsettled until its side
//! effects have run, so a replay or the retry sweep picks it up again.

use axum::http::HeaderMap;
use serde::de::DeserializeOwned;

use crate::{
  entity::{FailureKind, WithdrawalStatus, order},
  prelude::*,
  sv::{
    Cart, Commission, Failures, Order, User, Withdrawal,
    order::Payment,
    tier::Tier,
    wechat::{Gateway, Notification, NotifyHeaders, Transaction, TransferBill},
    withdrawal::TransferUpdate,
  },
  utils,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// Order moved to paid by this notification.
  Paid(String),
  /// Withdrawal moved to the given state by this notification.
  Payout(String, WithdrawalStatus),
  /// Replay of something already applied.
  Duplicate(String),
  /// Authentic, but nothing to apply.
  Ignored,
}

pub struct Reconciler<'a> {
  db: &'a DatabaseConnection,
  gateway: &'a dyn Gateway,
  timeout: Duration,
}

impl<'a> Reconciler<'a> {
  pub fn new(db: &'a DatabaseConnection, gateway: &'a dyn Gateway) -> Self {
    Self { db, gateway, timeout: utils::DEFAULT_TIMEOUT }
  }

  /// Limit for the primary transition and, separately, for the side effects
  /// that follow it.
  pub fn with_timeout(self, timeout: Duration) -> Self {
    Self { timeout, ..self }
  }

  /// Authenticates and applies one notification. An `Err` means the
  /// gateway should redeliver it.
  pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Result<Outcome> {
    let headers = NotifyHeaders::from_headers(headers)?;
    self.gateway.verify(&headers, body)?;

    let notification: Notification = parse(body)?;
    let plain = self.gateway.decrypt(&notification.resource)?;
    debug!("notification {} ({})", notification.id, notification.event_type);

    let event = notification.event_type.as_str();
    let kind = notification.resource.original_type.as_str();
    if event.starts_with("TRANSACTION") || kind == "transaction" {
      self.on_payment(parse(&plain)?).await
    } else if event.starts_with("MCHTRANSFER") || kind == "mch_payment" {
      self.on_transfer(parse(&plain)?).await
    } else {
      info!("ignoring {event} notification {}", notification.id);
      Ok(Outcome::Ignored)
    }
  }

  async fn on_payment(&self, tx: Transaction) -> Result<Outcome> {
    if !tx.is_success() {
      info!(
        "order {} reported {}: {}",
        tx.out_trade_no,
        tx.trade_state, tx.trade_state_desc
      );
      return Ok(Outcome::Ignored);
    }

    let paid = utils::within(
      self.timeout,
      Order::mark_paid(self.db, &tx.out_trade_no, &tx.transaction_id),
    )
    .await;

    let order = match paid {
      Ok(Payment::Applied(order)) => order,
      Ok(Payment::Duplicate(order)) => {
        if order.settled_at.is_none() {
          info!("resuming settlement of replayed order {}", order.id);
          self.settle(&order).await;
        } else {
          debug!("payment for order {} replayed", order.id);
        }
        return Ok(Outcome::Duplicate(order.id));
      }
      Err(Error::OrderNotFound) => {
        error!(
          "transaction {} for unknown order {}",
          tx.transaction_id, tx.out_trade_no
        );
        return Ok(Outcome::Ignored);
      }
      Err(err @ Error::InvalidTransition { .. }) => {
        error!("transaction {}: {err}", tx.transaction_id);
        return Ok(Outcome::Ignored);
      }
      Err(err) => return Err(err),
    };

    self.settle(&order).await;
    Ok(Outcome::Paid(order.id))
  }

  /// Runs the post-payment side effects of a paid order under their own
  /// limit. On expiry the order stays unsettled for the retry sweep.
  pub async fn settle(&self, order: &order::Model) {
    if tokio::time::timeout(self.timeout, self.after_payment(order))
      .await
      .is_err()
    {
      warn!("side effects of order {} timed out", order.id);
      Failures::new(self.db)
        .note(FailureKind::Commission, &order.id, &Error::Timeout)
        .await;
    }
  }

  /// Settles paid orders whose side effects never finished, paid before
  /// `cutoff`. Returns how many were picked up.
  pub async fn resume_unsettled(&self, cutoff: DateTime) -> Result<usize> {
    let orders = Order::new(self.db).unsettled(cutoff).await?;
    for order in &orders {
      info!("resuming settlement of order {}", order.id);
      self.settle(order).await;
    }
    Ok(orders.len())
  }

  async fn after_payment(&self, order: &order::Model) {
    let failures = Failures::new(self.db);

    if let Err(err) = Commission::new(self.db).process_order(&order.id).await {
      failures.note(FailureKind::Commission, &order.id, &err).await;
    }

    if let Err(err) =
      Cart::clear_purchased(self.db, &order.user_id, &order.cart_items.0).await
    {
      failures.note(FailureKind::CartClear, &order.id, &err).await;
    }

    if order.used_referral_discount() {
      if let Err(err) =
        User::mark_referral_discount_used(self.db, &order.user_id).await
      {
        failures.note(FailureKind::ReferralDiscount, &order.id, &err).await;
      }
    }

    // anything that failed above is owned by the ledger now
    if let Err(err) = Order::mark_settled(self.db, &order.id).await {
      warn!("order {} not flagged settled: {err}", order.id);
    }
  }

  async fn on_transfer(&self, bill: TransferBill) -> Result<Outcome> {
    let update = utils::within(
      self.timeout,
      Withdrawal::new(self.db, self.gateway).apply_transfer(&bill),
    )
    .await?;

    match update {
      TransferUpdate::Applied(record) => {
        if record.status == WithdrawalStatus::Completed {
          let reset =
            utils::within(self.timeout, Tier::reset(self.db, &record.user_id))
              .await;
          if let Err(err) = reset {
            Failures::new(self.db)
              .note(FailureKind::TierReset, &record.out_bill_no, &err)
              .await;
          }
        }
        Ok(Outcome::Payout(record.out_bill_no, record.status))
      }
      TransferUpdate::Unchanged(record) => {
        Ok(Outcome::Duplicate(record.out_bill_no))
      }
      TransferUpdate::Unknown => Ok(Outcome::Ignored),
    }
  }
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
  json::from_slice(bytes).map_err(|err| Error::IncorrectFormat(err.to_string()))
}
