use sea_orm::sea_query::Expr;

use crate::{
  entity::{CommissionStatus, WithdrawalStatus, commission, withdrawal},
  prelude::*,
};

/// Withdrawable funds are derived, never stored: settled commissions minus
/// completed payouts.
pub struct Balance<'a, C> {
  db: &'a C,
}

impl<'a, C: ConnectionTrait> Balance<'a, C> {
  pub fn new(db: &'a C) -> Self {
    Self { db }
  }

  pub async fn earned(&self, user_id: &str) -> Result<i64> {
    let total = commission::Entity::find()
      .select_only()
      .column_as(Expr::col(commission::Column::Amount).sum(), "total")
      .filter(commission::Column::BeneficiaryId.eq(user_id))
      .filter(commission::Column::Status.eq(CommissionStatus::Paid))
      .into_tuple::<Option<i64>>()
      .one(self.db)
      .await?;
    Ok(total.flatten().unwrap_or(0))
  }

  pub async fn withdrawn(&self, user_id: &str) -> Result<i64> {
    let total = withdrawal::Entity::find()
      .select_only()
      .column_as(Expr::col(withdrawal::Column::Amount).sum(), "total")
      .filter(withdrawal::Column::UserId.eq(user_id))
      .filter(withdrawal::Column::Status.eq(WithdrawalStatus::Completed))
      .into_tuple::<Option<i64>>()
      .one(self.db)
      .await?;
    Ok(total.flatten().unwrap_or(0))
  }

  pub async fn available(&self, user_id: &str) -> Result<i64> {
    Ok(self.earned(user_id).await? - self.withdrawn(user_id).await?)
  }
}
