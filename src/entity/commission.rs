use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::{order, user};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
  #[sea_orm(string_value = "pending")]
  #[default]
  Pending,
  #[sea_orm(string_value = "paid")]
  Paid,
  #[sea_orm(string_value = "cancelled")]
  Cancelled,
}

impl CommissionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Paid => "paid",
      Self::Cancelled => "cancelled",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum CommissionKind {
  #[sea_orm(string_value = "referral")]
  Referral,
  #[sea_orm(string_value = "agent")]
  Agent,
}

impl CommissionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Referral => "referral",
      Self::Agent => "agent",
    }
  }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commissions")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub beneficiary_id: String,
  pub amount: i64,
  pub status: CommissionStatus,
  pub kind: CommissionKind,
  pub description: String,
  pub order_id: String,
  pub referred_user_id: Option<String>,
  pub referred_user_name: Option<String>,
  /// `{kind}:{beneficiary}:{order}`, one credit per rule and order.
  #[sea_orm(unique)]
  pub dedup_key: String,
  pub created_at: DateTime,
  pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "user::Entity",
    from = "Column::BeneficiaryId",
    to = "user::Column::OpenId"
  )]
  Beneficiary,
  #[sea_orm(
    belongs_to = "order::Entity",
    from = "Column::OrderId",
    to = "order::Column::Id"
  )]
  Order,
}

impl Related<user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Beneficiary.def()
  }
}

impl Related<order::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Order.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
