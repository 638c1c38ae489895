use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::{referral_usage, user};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "referrals")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub code: String,
  #[sea_orm(unique)]
  pub owner_id: String,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "user::Entity",
    from = "Column::OwnerId",
    to = "user::Column::OpenId"
  )]
  Owner,
  #[sea_orm(has_many = "referral_usage::Entity")]
  Usages,
}

impl Related<user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Owner.def()
  }
}

impl Related<referral_usage::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Usages.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
