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
          .table(Referrals::Table)
          .if_not_exists()
          .col(ColumnDef::new(Referrals::Code).string().not_null().primary_key())
          .col(
            ColumnDef::new(Referrals::OwnerId)
              .string()
              .not_null()
              .unique_key(),
          )
          .col(ColumnDef::new(Referrals::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_referrals_owner")
              .from(Referrals::Table, Referrals::OwnerId)
              .to(Users::Table, Users::OpenId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(ReferralUsages::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(ReferralUsages::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(ReferralUsages::Code).string().not_null())
          .col(
            ColumnDef::new(ReferralUsages::UserId)
              .string()
              .not_null()
              .unique_key(),
          )
          .col(
            ColumnDef::new(ReferralUsages::UserName)
              .string()
              .not_null()
              .default(""),
          )
          .col(ColumnDef::new(ReferralUsages::UsedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_referral_usages_code")
              .from(ReferralUsages::Table, ReferralUsages::Code)
              .to(Referrals::Table, Referrals::Code)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_referral_usages_code")
          .table(ReferralUsages::Table)
          .col(ReferralUsages::Code)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(ReferralUsages::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Referrals::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
enum Referrals {
  Table,
  Code,
  OwnerId,
  CreatedAt,
}

#[derive(DeriveIden)]
enum ReferralUsages {
  Table,
  Id,
  Code,
  UserId,
  UserName,
  UsedAt,
}
