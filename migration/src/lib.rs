pub use sea_orm_migration::prelude::*;

mod m20251020_000001_create_users;
mod m20251020_000002_create_orders;
mod m20251020_000003_create_referrals;
mod m20251020_000004_create_commissions;
mod m20251020_000005_create_withdrawals;
mod m20251103_000006_create_settlement_failures;
mod m20251116_000007_add_order_settled_at;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20251020_000001_create_users::Migration),
      Box::new(m20251020_000002_create_orders::Migration),
      Box::new(m20251020_000003_create_referrals::Migration),
      Box::new(m20251020_000004_create_commissions::Migration),
      Box::new(m20251020_000005_create_withdrawals::Migration),
      Box::new(m20251103_000006_create_settlement_failures::Migration),
      Box::new(m20251116_000007_add_order_settled_at::Migration),
    ]
  }
}
