//! Schools and regions assigned to agents.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::user;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum TerritoryKind {
  /// Managed by a tier-1 agent.
  #[sea_orm(string_value = "school")]
  School,
  /// A city, managed by a tier-2 agent.
  #[sea_orm(string_value = "region")]
  Region,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "territories")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub kind: TerritoryKind,
  pub name: String,
  pub agent_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "user::Entity",
    from = "Column::AgentId",
    to = "user::Column::OpenId"
  )]
  Agent,
}

impl Related<user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Agent.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
