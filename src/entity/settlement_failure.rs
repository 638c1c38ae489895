//! Side effects of settlement that failed after the primary transition
//! was already committed. Rows stay unresolved until a retry succeeds.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// Subject is an order id.
  #[sea_orm(string_value = "commission")]
  Commission,
  /// Subject is an order id.
  #[sea_orm(string_value = "cart_clear")]
  CartClear,
  /// Subject is an order id.
  #[sea_orm(string_value = "referral_discount")]
  ReferralDiscount,
  /// Subject is a withdrawal's merchant reference.
  #[sea_orm(string_value = "tier_reset")]
  TierReset,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "settlement_failures")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub kind: FailureKind,
  pub subject: String,
  #[sea_orm(column_type = "Text")]
  pub detail: String,
  pub attempts: i32,
  pub resolved: bool,
  pub created_at: DateTime,
  pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
