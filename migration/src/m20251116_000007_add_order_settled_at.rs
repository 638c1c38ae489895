use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .alter_table(
        Table::alter()
          .table(Orders::Table)
          .add_column(ColumnDef::new(Orders::SettledAt).date_time().null())
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .alter_table(
        Table::alter().table(Orders::Table).drop_column(Orders::SettledAt).to_owned(),
      )
      .await
  }
}

#[derive(DeriveIden)]
enum Orders {
  Table,
  SettledAt,
}
