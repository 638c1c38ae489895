//! Shared test utilities for database setup

#[cfg(test)]
pub mod test_db {
  use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema,
  };

  use crate::entity::*;

  /// Creates an in-memory SQLite database with all required tables
  pub async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(DbBackend::Sqlite);

    // Referenced tables first
    let stmts = [
      schema.create_table_from_entity(user::Entity),
      schema.create_table_from_entity(territory::Entity),
      schema.create_table_from_entity(referral::Entity),
      schema.create_table_from_entity(referral_usage::Entity),
      schema.create_table_from_entity(order::Entity),
      schema.create_table_from_entity(cart_item::Entity),
      schema.create_table_from_entity(commission::Entity),
      schema.create_table_from_entity(withdrawal::Entity),
      schema.create_table_from_entity(settlement_failure::Entity),
    ];

    for stmt in stmts {
      db.execute(db.get_database_backend().build(&stmt)).await.unwrap();
    }

    // Composite unique index the entity does not carry
    db.execute_unprepared(
      "CREATE UNIQUE INDEX idx_territory_kind_name ON territories (kind, name)",
    )
    .await
    .unwrap();

    db
  }
}
