use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Users::Table)
          .if_not_exists()
          .col(ColumnDef::new(Users::OpenId).string().not_null().primary_key())
          .col(ColumnDef::new(Users::UserName).string().not_null().default(""))
          .col(ColumnDef::new(Users::School).string().not_null().default(""))
          .col(ColumnDef::new(Users::City).string().not_null().default(""))
          .col(
            ColumnDef::new(Users::AgentLevel)
              .integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Users::IsAgent)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(
            ColumnDef::new(Users::AccumulatedSales)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(ColumnDef::new(Users::ReferralCode).string().null().unique_key())
          .col(ColumnDef::new(Users::ReferredBy).string().null())
          .col(
            ColumnDef::new(Users::HasUsedReferralDiscount)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(ColumnDef::new(Users::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Users::UpdatedAt).date_time().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(Territories::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Territories::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Territories::Kind).string().not_null())
          .col(ColumnDef::new(Territories::Name).string().not_null())
          .col(ColumnDef::new(Territories::AgentId).string().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_territories_agent")
              .from(Territories::Table, Territories::AgentId)
              .to(Users::Table, Users::OpenId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    // one responsible agent per school or region
    manager
      .create_index(
        Index::create()
          .name("idx_territories_kind_name")
          .table(Territories::Table)
          .col(Territories::Kind)
          .col(Territories::Name)
          .unique()
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Territories::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Users::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Users {
  Table,
  OpenId,
  UserName,
  School,
  City,
  AgentLevel,
  IsAgent,
  AccumulatedSales,
  ReferralCode,
  ReferredBy,
  HasUsedReferralDiscount,
  CreatedAt,
  UpdatedAt,
}

#[derive(DeriveIden)]
enum Territories {
  Table,
  Id,
  Kind,
  Name,
  AgentId,
}
