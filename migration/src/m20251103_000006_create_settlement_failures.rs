use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(SettlementFailures::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(SettlementFailures::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(SettlementFailures::Kind).string().not_null())
          .col(ColumnDef::new(SettlementFailures::Subject).string().not_null())
          .col(ColumnDef::new(SettlementFailures::Detail).text().not_null())
          .col(
            ColumnDef::new(SettlementFailures::Attempts)
              .integer()
              .not_null()
              .default(1),
          )
          .col(
            ColumnDef::new(SettlementFailures::Resolved)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(
            ColumnDef::new(SettlementFailures::CreatedAt)
              .date_time()
              .not_null(),
          )
          .col(
            ColumnDef::new(SettlementFailures::UpdatedAt)
              .date_time()
              .not_null(),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_settlement_failures_resolved")
          .table(SettlementFailures::Table)
          .col(SettlementFailures::Resolved)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(SettlementFailures::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
enum SettlementFailures {
  Table,
  Id,
  Kind,
  Subject,
  Detail,
  Attempts,
  Resolved,
  CreatedAt,
  UpdatedAt,
}
