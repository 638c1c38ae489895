use std::{fmt, str::FromStr};

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::user;
use crate::error::Error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
  #[sea_orm(string_value = "pending")]
  #[default]
  Pending,
  #[sea_orm(string_value = "processing")]
  Processing,
  #[sea_orm(string_value = "completed")]
  Completed,
  #[sea_orm(string_value = "failed")]
  Failed,
  #[sea_orm(string_value = "cancelled")]
  Cancelled,
}

impl WithdrawalStatus {
  pub const IN_FLIGHT: [Self; 2] = [Self::Pending, Self::Processing];

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Processing => "processing",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalMethod {
  #[sea_orm(string_value = "wechat")]
  Wechat,
  #[sea_orm(string_value = "alipay")]
  Alipay,
  #[sea_orm(string_value = "bank_transfer")]
  BankTransfer,
}

impl FromStr for WithdrawalMethod {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "wechat" => Ok(Self::Wechat),
      "alipay" => Ok(Self::Alipay),
      "bank_transfer" => Ok(Self::BankTransfer),
      other => Err(Error::InvalidMethod(other.to_string())),
    }
  }
}

impl fmt::Display for WithdrawalMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Wechat => "wechat",
      Self::Alipay => "alipay",
      Self::BankTransfer => "bank_transfer",
    })
  }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "withdrawals")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  /// Merchant reference sent to the payout gateway.
  #[sea_orm(unique)]
  pub out_bill_no: String,
  pub user_id: String,
  /// Holds `user_id` until the withdrawal reaches a terminal state.
  #[sea_orm(unique)]
  pub active_user: Option<String>,
  pub amount: i64,
  pub fee: i64,
  pub net_amount: i64,
  pub method: WithdrawalMethod,
  pub account_info: Option<Json>,
  pub status: WithdrawalStatus,
  pub transfer_bill_no: Option<String>,
  pub transfer_state: Option<String>,
  pub failure_reason: Option<String>,
  pub estimated_arrival: DateTime,
  pub completed_at: Option<DateTime>,
  pub created_at: DateTime,
  pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "user::Entity",
    from = "Column::UserId",
    to = "user::Column::OpenId"
  )]
  User,
}

impl Related<user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::User.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
