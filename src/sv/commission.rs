//! Commission engine. Each paid order is offered to every
//! [`BeneficiaryRule`]; a rule that finds a beneficiary produces at most
//! one commission per order, guarded by the record's dedup key.

use sea_orm::{DatabaseTransaction, sea_query::Expr};
use serde::Serialize;

use crate::{
  entity::{
    CommissionKind, CommissionStatus, OrderStatus, TerritoryKind, commission,
    order, user,
  },
  prelude::*,
  sv::{
    Referral, User,
    tier::{Tier, region_rate, school_rate},
  },
  utils::{self, apply_rate},
};

/// Flat reward for the referrer of a user's first purchase, in cents.
pub const REFERRAL_BONUS: i64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeneficiaryRule {
  /// Referrer of a first-time purchaser.
  ReferralBonus,
  /// Tier-1 agent of the purchaser's school.
  SchoolAgent,
  /// Tier-2 agent of the purchaser's city.
  RegionAgent,
}

impl BeneficiaryRule {
  pub const ALL: [Self; 3] =
    [Self::ReferralBonus, Self::SchoolAgent, Self::RegionAgent];

  pub fn kind(self) -> CommissionKind {
    match self {
      Self::ReferralBonus => CommissionKind::Referral,
      Self::SchoolAgent | Self::RegionAgent => CommissionKind::Agent,
    }
  }

  pub fn dedup_key(self, beneficiary: &str, order_id: &str) -> String {
    format!("{}:{beneficiary}:{order_id}", self.kind().as_str())
  }

  async fn beneficiary(
    self,
    txn: &DatabaseTransaction,
    order: &order::Model,
    purchaser: &user::Model,
  ) -> Result<Option<user::Model>> {
    match self {
      Self::ReferralBonus => referrer_of_first_purchase(txn, order, purchaser).await,
      Self::SchoolAgent => {
        User::agent_for(txn, TerritoryKind::School, &purchaser.school).await
      }
      Self::RegionAgent => {
        // region credit follows the school-based attribution
        if purchaser.school.is_empty() {
          return Ok(None);
        }
        User::agent_for(txn, TerritoryKind::Region, &purchaser.city).await
      }
    }
  }

  /// Amount in cents and a human-readable description.
  async fn credit(
    self,
    txn: &DatabaseTransaction,
    beneficiary: &user::Model,
    order: &order::Model,
    purchaser: &user::Model,
  ) -> Result<(i64, String)> {
    match self {
      Self::ReferralBonus => Ok((
        REFERRAL_BONUS,
        format!("Referral bonus for the first purchase of {}", purchaser.user_name),
      )),
      Self::SchoolAgent | Self::RegionAgent => {
        let total = Tier::increment(txn, &beneficiary.open_id, order.total).await?;
        let (rate, area) = match self {
          Self::SchoolAgent => (school_rate(total), &purchaser.school),
          _ => (region_rate(total), &purchaser.city),
        };

        Ok((
          apply_rate(order.total, rate),
          format!(
            "{} commission on order {} in {area}",
            utils::format_bps(rate),
            order.id
          ),
        ))
      }
    }
  }
}

async fn referrer_of_first_purchase(
  txn: &DatabaseTransaction,
  order: &order::Model,
  purchaser: &user::Model,
) -> Result<Option<user::Model>> {
  let Some(code) = purchaser.referred_by.as_deref() else {
    return Ok(None);
  };

  // the discount flag may have been set by this very order
  if purchaser.has_used_referral_discount && !order.used_referral_discount() {
    return Ok(None);
  }

  let Some(referrer) = Referral::owner_of(txn, code).await? else {
    warn!("{} was referred by unknown code {code}", purchaser.open_id);
    return Ok(None);
  };
  if referrer.open_id == purchaser.open_id {
    return Ok(None);
  }

  let mut earlier = order::Entity::find()
    .filter(order::Column::UserId.eq(purchaser.open_id.as_str()))
    .filter(order::Column::Id.ne(order.id.as_str()))
    .filter(
      order::Column::Status.is_in([OrderStatus::Paid, OrderStatus::Completed]),
    );
  if let Some(paid_at) = order.paid_at {
    earlier = earlier.filter(order::Column::PaidAt.lt(paid_at));
  }
  if earlier.count(txn).await? > 0 {
    return Ok(None);
  }

  let rewarded = commission::Entity::find()
    .filter(commission::Column::Kind.eq(CommissionKind::Referral))
    .filter(commission::Column::ReferredUserId.eq(purchaser.open_id.as_str()))
    .count(txn)
    .await?;

  Ok((rewarded == 0).then_some(referrer))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommissionSummary {
  pub total: i64,
  pub pending: i64,
  pub paid: i64,
  pub this_month: i64,
  pub last_month: i64,
}

pub struct Commission<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Commission<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  /// Runs every rule for a paid order. Rules are independent: a failing
  /// rule does not stop the others, the first error is returned after all
  /// of them ran. Safe to repeat.
  pub async fn process_order(
    &self,
    order_id: &str,
  ) -> Result<Vec<commission::Model>> {
    let order = order::Entity::find_by_id(order_id)
      .one(self.db)
      .await?
      .ok_or(Error::OrderNotFound)?;

    if !matches!(order.status, OrderStatus::Paid | OrderStatus::Completed) {
      return Err(Error::InvalidArgs(format!(
        "order {order_id} is {}, commissions need a paid order",
        order.status.as_str()
      )));
    }

    let purchaser = user::Entity::find_by_id(order.user_id.as_str())
      .one(self.db)
      .await?
      .ok_or(Error::UserNotFound)?;

    let mut created = Vec::new();
    let mut failure = None;

    for rule in BeneficiaryRule::ALL {
      match self.apply(rule, &order, &purchaser).await {
        Ok(Some(model)) => created.push(model),
        Ok(None) => {}
        Err(err) => {
          error!("{rule:?} failed for order {order_id}: {err}");
          failure.get_or_insert(err);
        }
      }
    }

    match failure {
      Some(err) => Err(err),
      None => Ok(created),
    }
  }

  async fn apply(
    &self,
    rule: BeneficiaryRule,
    order: &order::Model,
    purchaser: &user::Model,
  ) -> Result<Option<commission::Model>> {
    let txn = self.db.begin().await?;

    let Some(beneficiary) = rule.beneficiary(&txn, order, purchaser).await?
    else {
      return Ok(None);
    };

    let dedup_key = rule.dedup_key(&beneficiary.open_id, &order.id);
    let exists = commission::Entity::find()
      .filter(commission::Column::DedupKey.eq(dedup_key.as_str()))
      .count(&txn)
      .await?;
    if exists > 0 {
      debug!("{dedup_key} already credited");
      return Ok(None);
    }

    let (amount, description) =
      rule.credit(&txn, &beneficiary, order, purchaser).await?;

    let now = now();
    let (referred_user_id, referred_user_name) = match rule {
      BeneficiaryRule::ReferralBonus => {
        (Some(purchaser.open_id.clone()), Some(purchaser.user_name.clone()))
      }
      _ => (None, None),
    };

    let inserted = commission::ActiveModel {
      beneficiary_id: Set(beneficiary.open_id.clone()),
      amount: Set(amount),
      status: Set(CommissionStatus::Pending),
      kind: Set(rule.kind()),
      description: Set(description),
      order_id: Set(order.id.clone()),
      referred_user_id: Set(referred_user_id),
      referred_user_name: Set(referred_user_name),
      dedup_key: Set(dedup_key.clone()),
      created_at: Set(now),
      updated_at: Set(now),
      ..Default::default()
    }
    .insert(&txn)
    .await;

    let model = match inserted {
      Ok(model) => model,
      // a concurrent run won; dropping the transaction undoes our increment
      Err(err) if Error::is_conflict(&err) => {
        debug!("{dedup_key} credited concurrently");
        txn.rollback().await?;
        return Ok(None);
      }
      Err(err) => return Err(err.into()),
    };

    txn.commit().await?;
    info!(
      "commission {} of {} credited to {} for order {}",
      model.id,
      utils::format_yuan(model.amount),
      model.beneficiary_id,
      model.order_id
    );

    Ok(Some(model))
  }

  pub async fn by_id(&self, id: i32) -> Result<commission::Model> {
    commission::Entity::find_by_id(id)
      .one(self.db)
      .await?
      .ok_or(Error::CommissionNotFound)
  }

  pub async fn list(
    &self,
    beneficiary_id: &str,
    status: Option<CommissionStatus>,
  ) -> Result<Vec<commission::Model>> {
    let mut query = commission::Entity::find()
      .filter(commission::Column::BeneficiaryId.eq(beneficiary_id));
    if let Some(status) = status {
      query = query.filter(commission::Column::Status.eq(status));
    }

    let commissions = query
      .order_by_desc(commission::Column::CreatedAt)
      .all(self.db)
      .await?;
    Ok(commissions)
  }

  pub async fn summary(&self, beneficiary_id: &str) -> Result<CommissionSummary> {
    let commissions = commission::Entity::find()
      .filter(commission::Column::BeneficiaryId.eq(beneficiary_id))
      .filter(commission::Column::Status.ne(CommissionStatus::Cancelled))
      .all(self.db)
      .await?;

    let this_month = month_start(now());
    let last_month = month_start(this_month - TimeDelta::days(1));

    let mut summary = CommissionSummary::default();
    for c in commissions {
      summary.total += c.amount;
      match c.status {
        CommissionStatus::Pending => summary.pending += c.amount,
        CommissionStatus::Paid => summary.paid += c.amount,
        CommissionStatus::Cancelled => {}
      }
      if c.created_at >= this_month {
        summary.this_month += c.amount;
      } else if c.created_at >= last_month {
        summary.last_month += c.amount;
      }
    }

    Ok(summary)
  }

  /// Settles pending commissions created before `cutoff`.
  pub async fn settle_due(&self, cutoff: DateTime) -> Result<u64> {
    let res = commission::Entity::update_many()
      .col_expr(commission::Column::Status, Expr::value(CommissionStatus::Paid))
      .col_expr(commission::Column::UpdatedAt, Expr::value(now()))
      .filter(commission::Column::Status.eq(CommissionStatus::Pending))
      .filter(commission::Column::CreatedAt.lte(cutoff))
      .exec(self.db)
      .await?;

    if res.rows_affected > 0 {
      info!("settled {} commissions", res.rows_affected);
    }
    Ok(res.rows_affected)
  }

  pub async fn settle(&self, id: i32) -> Result<commission::Model> {
    self.transition(id, CommissionStatus::Paid).await
  }

  pub async fn cancel(&self, id: i32) -> Result<commission::Model> {
    self.transition(id, CommissionStatus::Cancelled).await
  }

  async fn transition(
    &self,
    id: i32,
    to: CommissionStatus,
  ) -> Result<commission::Model> {
    let res = commission::Entity::update_many()
      .col_expr(commission::Column::Status, Expr::value(to))
      .col_expr(commission::Column::UpdatedAt, Expr::value(now()))
      .filter(commission::Column::Id.eq(id))
      .filter(commission::Column::Status.eq(CommissionStatus::Pending))
      .exec(self.db)
      .await?;

    let commission = self.by_id(id).await?;
    if res.rows_affected == 0 {
      return Err(Error::InvalidTransition {
        entity: "commission",
        from: commission.status.as_str(),
        to: to.as_str(),
      });
    }

    Ok(commission)
  }
}

fn month_start(at: DateTime) -> DateTime {
  use chrono::Datelike;

  at.date()
    .with_day(1)
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .unwrap_or(at)
}
