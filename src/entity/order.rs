use json as serde_json;
use sea_orm::{FromJsonQueryResult, entity::prelude::*};
use serde::{Deserialize, Serialize};

use super::{commission, user};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  #[sea_orm(string_value = "pending")]
  #[default]
  Pending,
  #[sea_orm(string_value = "paid")]
  Paid,
  #[sea_orm(string_value = "completed")]
  Completed,
  #[sea_orm(string_value = "cancelled")]
  Cancelled,
}

impl OrderStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Paid => "paid",
      Self::Completed => "completed",
      Self::Cancelled => "cancelled",
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
  pub product_id: String,
  pub quantity: i32,
  /// Price of one unit in cents.
  pub unit_price: i64,
}

impl LineItem {
  pub fn amount(&self) -> i64 {
    self.unit_price * self.quantity as i64
  }
}

#[derive(
  Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult,
)]
pub struct LineItems(pub Vec<LineItem>);

/// Product ids of the cart rows this order was placed from.
#[derive(
  Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult,
)]
pub struct CartSelection(pub Vec<String>);

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
  /// Doubles as the merchant reference sent to the payment gateway.
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: String,
  pub user_id: String,
  #[sea_orm(column_type = "Json")]
  pub items: LineItems,
  #[sea_orm(column_type = "Json")]
  pub cart_items: CartSelection,
  pub subtotal: i64,
  /// Basis points.
  pub discount_rate: i32,
  pub discount: i64,
  pub total: i64,
  pub status: OrderStatus,
  pub referral_code: Option<String>,
  pub referrer_id: Option<String>,
  #[sea_orm(unique)]
  pub transaction_id: Option<String>,
  pub paid_at: Option<DateTime>,
  /// Set once the post-payment side effects have run or been handed to the
  /// failure ledger.
  pub settled_at: Option<DateTime>,
  pub created_at: DateTime,
  pub updated_at: DateTime,
}

impl Model {
  pub fn used_referral_discount(&self) -> bool {
    self.discount > 0 && self.referrer_id.is_some()
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "user::Entity",
    from = "Column::UserId",
    to = "user::Column::OpenId"
  )]
  User,
  #[sea_orm(has_many = "commission::Entity")]
  Commissions,
}

impl Related<user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::User.def()
  }
}

impl Related<commission::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Commissions.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
