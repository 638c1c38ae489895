use sea_orm_migration::prelude::*;

use super::m20251020_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Withdrawals::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Withdrawals::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(
            ColumnDef::new(Withdrawals::OutBillNo)
              .string()
              .not_null()
              .unique_key(),
          )
          .col(ColumnDef::new(Withdrawals::UserId).string().not_null())
          // set while the withdrawal is in flight, cleared on terminal states
          .col(ColumnDef::new(Withdrawals::ActiveUser).string().null().unique_key())
          .col(ColumnDef::new(Withdrawals::Amount).big_integer().not_null())
          .col(ColumnDef::new(Withdrawals::Fee).big_integer().not_null())
          .col(ColumnDef::new(Withdrawals::NetAmount).big_integer().not_null())
          .col(ColumnDef::new(Withdrawals::Method).string().not_null())
          .col(ColumnDef::new(Withdrawals::AccountInfo).json().null())
          .col(
            ColumnDef::new(Withdrawals::Status)
              .string()
              .not_null()
              .default("pending"),
          )
          .col(ColumnDef::new(Withdrawals::TransferBillNo).string().null())
          .col(ColumnDef::new(Withdrawals::TransferState).string().null())
          .col(ColumnDef::new(Withdrawals::FailureReason).string().null())
          .col(
            ColumnDef::new(Withdrawals::EstimatedArrival)
              .date_time()
              .not_null(),
          )
          .col(ColumnDef::new(Withdrawals::CompletedAt).date_time().null())
          .col(ColumnDef::new(Withdrawals::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Withdrawals::UpdatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_withdrawals_user")
              .from(Withdrawals::Table, Withdrawals::UserId)
              .to(Users::Table, Users::OpenId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_withdrawals_user_status")
          .table(Withdrawals::Table)
          .col(Withdrawals::UserId)
          .col(Withdrawals::Status)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Withdrawals::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
enum Withdrawals {
  Table,
  Id,
  OutBillNo,
  UserId,
  ActiveUser,
  Amount,
  Fee,
  NetAmount,
  Method,
  AccountInfo,
  Status,
  TransferBillNo,
  TransferState,
  FailureReason,
  EstimatedArrival,
  CompletedAt,
  CreatedAt,
  UpdatedAt,
}
