use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::referral;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "referral_usages")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub code: String,
  #[sea_orm(unique)]
  pub user_id: String,
  pub user_name: String,
  pub used_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "referral::Entity",
    from = "Column::Code",
    to = "referral::Column::Code"
  )]
  Referral,
}

impl Related<referral::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Referral.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
