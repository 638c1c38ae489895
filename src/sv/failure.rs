use serde::Serialize;

use crate::{
  entity::{FailureKind, WithdrawalStatus, settlement_failure, withdrawal},
  prelude::*,
  sv::{Cart, Commission, Order, User, tier::Tier},
};

const RETRY_BATCH: u64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryReport {
  pub resolved: u64,
  pub failed: u64,
}

/// Ledger of settlement side effects that failed after their primary
/// transition committed.
pub struct Failures<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Failures<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn record(
    &self,
    kind: FailureKind,
    subject: &str,
    err: &Error,
  ) -> Result<settlement_failure::Model> {
    error!("{kind:?} for {subject} failed: {err}");

    let existing = settlement_failure::Entity::find()
      .filter(settlement_failure::Column::Kind.eq(kind))
      .filter(settlement_failure::Column::Subject.eq(subject))
      .filter(settlement_failure::Column::Resolved.eq(false))
      .one(self.db)
      .await?;

    let now = now();
    let model = match existing {
      Some(failure) => {
        settlement_failure::ActiveModel {
          attempts: Set(failure.attempts + 1),
          detail: Set(err.to_string()),
          updated_at: Set(now),
          ..failure.into()
        }
        .update(self.db)
        .await?
      }
      None => {
        settlement_failure::ActiveModel {
          kind: Set(kind),
          subject: Set(subject.to_string()),
          detail: Set(err.to_string()),
          attempts: Set(1),
          resolved: Set(false),
          created_at: Set(now),
          updated_at: Set(now),
          ..Default::default()
        }
        .insert(self.db)
        .await?
      }
    };

    Ok(model)
  }

  /// Like [`Self::record`], for callers that cannot fail any further.
  pub async fn note(&self, kind: FailureKind, subject: &str, err: &Error) {
    if let Err(ledger) = self.record(kind, subject, err).await {
      error!("could not record {kind:?} failure for {subject}: {ledger}");
    }
  }

  pub async fn unresolved(&self) -> Result<Vec<settlement_failure::Model>> {
    let failures = settlement_failure::Entity::find()
      .filter(settlement_failure::Column::Resolved.eq(false))
      .order_by_asc(settlement_failure::Column::UpdatedAt)
      .limit(RETRY_BATCH)
      .all(self.db)
      .await?;
    Ok(failures)
  }

  pub async fn retry_all(&self) -> Result<RetryReport> {
    let mut report = RetryReport::default();

    for failure in self.unresolved().await? {
      match self.retry(&failure).await {
        Ok(()) => {
          settlement_failure::ActiveModel {
            resolved: Set(true),
            updated_at: Set(now()),
            ..failure.clone().into()
          }
          .update(self.db)
          .await?;
          info!("{:?} for {} resolved", failure.kind, failure.subject);
          report.resolved += 1;
        }
        Err(err) => {
          self.record(failure.kind, &failure.subject, &err).await?;
          report.failed += 1;
        }
      }
    }

    Ok(report)
  }

  async fn retry(&self, failure: &settlement_failure::Model) -> Result<()> {
    let subject = failure.subject.as_str();

    match failure.kind {
      FailureKind::Commission => {
        Commission::new(self.db).process_order(subject).await?;
      }
      FailureKind::CartClear => {
        let order = Order::new(self.db).by_id(subject).await?;
        Cart::clear_purchased(self.db, &order.user_id, &order.cart_items.0)
          .await?;
      }
      FailureKind::ReferralDiscount => {
        let order = Order::new(self.db).by_id(subject).await?;
        User::mark_referral_discount_used(self.db, &order.user_id).await?;
      }
      FailureKind::TierReset => {
        let record = withdrawal::Entity::find()
          .filter(withdrawal::Column::OutBillNo.eq(subject))
          .one(self.db)
          .await?
          .ok_or(Error::WithdrawalNotFound)?;
        if record.status == WithdrawalStatus::Completed {
          Tier::reset(self.db, &record.user_id).await?;
        }
      }
    }

    Ok(())
  }
}
