use sea_orm_migration::prelude::*;

use super::{
  m20251020_000001_create_users::Users, m20251020_000002_create_orders::Orders,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Commissions::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Commissions::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Commissions::BeneficiaryId).string().not_null())
          .col(ColumnDef::new(Commissions::Amount).big_integer().not_null())
          .col(
            ColumnDef::new(Commissions::Status)
              .string()
              .not_null()
              .default("pending"),
          )
          .col(ColumnDef::new(Commissions::Kind).string().not_null())
          .col(
            ColumnDef::new(Commissions::Description)
              .string()
              .not_null()
              .default(""),
          )
          .col(ColumnDef::new(Commissions::OrderId).string().not_null())
          .col(ColumnDef::new(Commissions::ReferredUserId).string().null())
          .col(ColumnDef::new(Commissions::ReferredUserName).string().null())
          .col(
            ColumnDef::new(Commissions::DedupKey)
              .string()
              .not_null()
              .unique_key(),
          )
          .col(ColumnDef::new(Commissions::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Commissions::UpdatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_commissions_beneficiary")
              .from(Commissions::Table, Commissions::BeneficiaryId)
              .to(Users::Table, Users::OpenId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_commissions_order")
              .from(Commissions::Table, Commissions::OrderId)
              .to(Orders::Table, Orders::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_commissions_beneficiary_status")
          .table(Commissions::Table)
          .col(Commissions::BeneficiaryId)
          .col(Commissions::Status)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Commissions::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
enum Commissions {
  Table,
  Id,
  BeneficiaryId,
  Amount,
  Status,
  Kind,
  Description,
  OrderId,
  ReferredUserId,
  ReferredUserName,
  DedupKey,
  CreatedAt,
  UpdatedAt,
}
