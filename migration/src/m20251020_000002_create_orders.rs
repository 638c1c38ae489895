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
          .table(Orders::Table)
          .if_not_exists()
          .col(ColumnDef::new(Orders::Id).string().not_null().primary_key())
          .col(ColumnDef::new(Orders::UserId).string().not_null())
          .col(ColumnDef::new(Orders::Items).json().not_null())
          .col(ColumnDef::new(Orders::CartItems).json().not_null())
          .col(ColumnDef::new(Orders::Subtotal).big_integer().not_null())
          .col(
            ColumnDef::new(Orders::DiscountRate)
              .integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Orders::Discount)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(ColumnDef::new(Orders::Total).big_integer().not_null())
          .col(
            ColumnDef::new(Orders::Status)
              .string()
              .not_null()
              .default("pending"),
          )
          .col(ColumnDef::new(Orders::ReferralCode).string().null())
          .col(ColumnDef::new(Orders::ReferrerId).string().null())
          .col(ColumnDef::new(Orders::TransactionId).string().null().unique_key())
          .col(ColumnDef::new(Orders::PaidAt).date_time().null())
          .col(ColumnDef::new(Orders::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Orders::UpdatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_orders_user")
              .from(Orders::Table, Orders::UserId)
              .to(Users::Table, Users::OpenId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_orders_user_status")
          .table(Orders::Table)
          .col(Orders::UserId)
          .col(Orders::Status)
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(CartItems::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(CartItems::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(CartItems::UserId).string().not_null())
          .col(ColumnDef::new(CartItems::ProductId).string().not_null())
          .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
          .col(ColumnDef::new(CartItems::UnitPrice).big_integer().not_null())
          .col(ColumnDef::new(CartItems::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_cart_items_user")
              .from(CartItems::Table, CartItems::UserId)
              .to(Users::Table, Users::OpenId)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(CartItems::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Orders::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Orders {
  Table,
  Id,
  UserId,
  Items,
  CartItems,
  Subtotal,
  DiscountRate,
  Discount,
  Total,
  Status,
  ReferralCode,
  ReferrerId,
  TransactionId,
  PaidAt,
  CreatedAt,
  UpdatedAt,
}

#[derive(DeriveIden)]
enum CartItems {
  Table,
  Id,
  UserId,
  ProductId,
  Quantity,
  UnitPrice,
  CreatedAt,
}
