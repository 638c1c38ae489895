use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::{commission, order, territory, withdrawal};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub open_id: String,
  pub user_name: String,
  pub school: String,
  pub city: String,
  /// 0 for regular users, 1 for school agents, 2 for region agents.
  pub agent_level: i32,
  pub is_agent: bool,
  /// Sales total in cents since the agent's last completed payout.
  pub accumulated_sales: i64,
  #[sea_orm(unique)]
  pub referral_code: Option<String>,
  /// Referral code this user onboarded with.
  pub referred_by: Option<String>,
  pub has_used_referral_discount: bool,
  pub created_at: DateTime,
  pub updated_at: DateTime,
}

impl Model {
  pub fn is_school_agent(&self) -> bool {
    self.is_agent && self.agent_level == 1
  }

  pub fn is_region_agent(&self) -> bool {
    self.is_agent && self.agent_level == 2
  }

  pub fn can_withdraw(&self) -> bool {
    self.is_agent && self.agent_level >= 1
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "order::Entity")]
  Orders,
  #[sea_orm(has_many = "commission::Entity")]
  Commissions,
  #[sea_orm(has_many = "withdrawal::Entity")]
  Withdrawals,
  #[sea_orm(has_many = "territory::Entity")]
  Territories,
}

impl Related<order::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Orders.def()
  }
}

impl Related<commission::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Commissions.def()
  }
}

impl Related<withdrawal::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Withdrawals.def()
  }
}

impl Related<territory::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Territories.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
