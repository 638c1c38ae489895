//! Agent sales counters and the rate tables keyed on them.

use sea_orm::sea_query::Expr;

use crate::{entity::user, prelude::*, utils::CENTS_PER_YUAN};

/// Rates are in basis points, 100 = 1%.
pub type Bps = i64;

const fn yuan(amount: i64) -> i64 {
  amount * CENTS_PER_YUAN
}

/// Tier-1 (school) agents: base 5%, +1% per 20,000 yuan.
const SCHOOL_TIERS: [(i64, Bps); 5] = [
  (yuan(100_000), 1000),
  (yuan(80_000), 900),
  (yuan(60_000), 800),
  (yuan(40_000), 700),
  (yuan(20_000), 600),
];
const SCHOOL_BASE: Bps = 500;

/// Tier-2 (region) agents: base 10%.
const REGION_TIERS: [(i64, Bps); 4] = [
  (yuan(16_000_000), 1500),
  (yuan(12_000_000), 1300),
  (yuan(8_000_000), 1200),
  (yuan(4_000_000), 1100),
];
const REGION_BASE: Bps = 1000;

fn lookup(tiers: &[(i64, Bps)], base: Bps, total: i64) -> Bps {
  tiers
    .iter()
    .find(|(threshold, _)| total >= *threshold)
    .map_or(base, |(_, rate)| *rate)
}

pub fn school_rate(total: i64) -> Bps {
  lookup(&SCHOOL_TIERS, SCHOOL_BASE, total)
}

pub fn region_rate(total: i64) -> Bps {
  lookup(&REGION_TIERS, REGION_BASE, total)
}

/// Checkout discount a referrer's code grants, by the referrer's level.
pub fn referral_discount_rate(level: i32) -> Bps {
  match level {
    0 => 500,
    1 => 1000,
    2 => 1500,
    _ => 200,
  }
}

/// Generic commission rate advertised for a user's level.
pub fn level_commission_rate(level: i32) -> Bps {
  match level {
    1 => 300,
    2 => 500,
    _ => 100,
  }
}

pub struct Tier;

impl Tier {
  /// Adds `delta` cents to the agent's counter and returns the new total.
  ///
  /// The increment is a single `SET x = x + delta` so concurrent calls never
  /// lose updates; the read happens inside the same transaction.
  pub async fn increment<C: TransactionTrait>(
    conn: &C,
    agent_id: &str,
    delta: i64,
  ) -> Result<i64> {
    if delta < 0 {
      return Err(Error::InvalidArgs("sales delta must not be negative".into()));
    }

    let txn = conn.begin().await?;

    let res = user::Entity::update_many()
      .col_expr(
        user::Column::AccumulatedSales,
        Expr::col(user::Column::AccumulatedSales).add(delta),
      )
      .col_expr(user::Column::UpdatedAt, Expr::value(now()))
      .filter(user::Column::OpenId.eq(agent_id))
      .exec(&txn)
      .await?;

    if res.rows_affected == 0 {
      return Err(Error::UserNotFound);
    }

    let total = user::Entity::find_by_id(agent_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?
      .accumulated_sales;

    txn.commit().await?;
    Ok(total)
  }

  /// Zeroes the counter after a completed payout. Non-agents are left
  /// alone; returns whether a row changed.
  pub async fn reset<C: ConnectionTrait>(conn: &C, agent_id: &str) -> Result<bool> {
    let res = user::Entity::update_many()
      .col_expr(user::Column::AccumulatedSales, Expr::value(0i64))
      .col_expr(user::Column::UpdatedAt, Expr::value(now()))
      .filter(user::Column::OpenId.eq(agent_id))
      .filter(user::Column::IsAgent.eq(true))
      .filter(user::Column::AgentLevel.gte(1))
      .exec(conn)
      .await?;

    if res.rows_affected > 0 {
      info!("sales counter of {agent_id} reset");
    }
    Ok(res.rows_affected > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::{User, test_utils::test_db};

  #[test]
  fn test_school_rate_boundaries() {
    assert_eq!(school_rate(0), 500);
    assert_eq!(school_rate(yuan(19_999)), 500);
    assert_eq!(school_rate(yuan(20_000)), 600);
    assert_eq!(school_rate(yuan(59_999)), 700);
    assert_eq!(school_rate(yuan(80_000)), 900);
    assert_eq!(school_rate(yuan(250_000)), 1000);
  }

  #[test]
  fn test_region_rate_boundaries() {
    assert_eq!(region_rate(yuan(3_999_999)), 1000);
    assert_eq!(region_rate(yuan(4_000_000)), 1100);
    assert_eq!(region_rate(yuan(12_000_000)), 1300);
    assert_eq!(region_rate(yuan(16_000_000)), 1500);
  }

  #[test]
  fn test_referral_discount_by_level() {
    assert_eq!(referral_discount_rate(0), 500);
    assert_eq!(referral_discount_rate(2), 1500);
    assert_eq!(referral_discount_rate(7), 200);
  }

  #[test]
  fn test_commission_rate_by_level() {
    assert_eq!(level_commission_rate(0), 100);
    assert_eq!(level_commission_rate(1), 300);
    assert_eq!(level_commission_rate(2), 500);
    assert_eq!(level_commission_rate(-1), 100);
    assert_eq!(level_commission_rate(9), 100);
  }

  #[tokio::test]
  async fn test_increment_returns_new_total() {
    let db = test_db::setup().await;
    User::new(&db).get_or_create("o_agent", "Agent").await.unwrap();

    assert_eq!(Tier::increment(&db, "o_agent", 1_000).await.unwrap(), 1_000);
    assert_eq!(Tier::increment(&db, "o_agent", 250).await.unwrap(), 1_250);
  }

  #[tokio::test]
  async fn test_increment_unknown_agent() {
    let db = test_db::setup().await;

    let result = Tier::increment(&db, "o_ghost", 100).await;
    assert!(matches!(result, Err(Error::UserNotFound)));
  }

  #[tokio::test]
  async fn test_concurrent_increments_are_not_lost() {
    let db = test_db::setup().await;
    User::new(&db).get_or_create("o_agent", "Agent").await.unwrap();

    let tasks = (0..20).map(|_| {
      let db = db.clone();
      tokio::spawn(async move { Tier::increment(&db, "o_agent", 500).await })
    });
    for result in futures::future::join_all(tasks).await {
      result.unwrap().unwrap();
    }

    let agent = User::new(&db).by_id("o_agent").await.unwrap().unwrap();
    assert_eq!(agent.accumulated_sales, 10_000);
  }

  #[tokio::test]
  async fn test_reset_only_touches_agents() {
    let db = test_db::setup().await;
    let sv = User::new(&db);
    sv.get_or_create("o_agent", "Agent").await.unwrap();
    sv.get_or_create("o_user", "User").await.unwrap();
    sv.promote("o_agent", 1, &["West High"]).await.unwrap();
    Tier::increment(&db, "o_agent", 5_000).await.unwrap();
    Tier::increment(&db, "o_user", 5_000).await.unwrap();

    assert!(Tier::reset(&db, "o_agent").await.unwrap());
    assert!(!Tier::reset(&db, "o_user").await.unwrap());

    let agent = sv.by_id("o_agent").await.unwrap().unwrap();
    let user = sv.by_id("o_user").await.unwrap().unwrap();
    assert_eq!(agent.accumulated_sales, 0);
    assert_eq!(user.accumulated_sales, 5_000);
  }
}
