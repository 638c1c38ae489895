use sea_orm::sea_query::Expr;

use crate::{
  entity::{TerritoryKind, territory, user},
  prelude::*,
};

pub struct User<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> User<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn get_or_create(
    &self,
    open_id: &str,
    user_name: &str,
  ) -> Result<user::Model> {
    if let Some(user) = user::Entity::find_by_id(open_id).one(self.db).await? {
      return Ok(user);
    }

    let now = now();
    let user = user::ActiveModel {
      open_id: Set(open_id.to_string()),
      user_name: Set(user_name.to_string()),
      school: Set(String::new()),
      city: Set(String::new()),
      agent_level: Set(0),
      is_agent: Set(false),
      accumulated_sales: Set(0),
      referral_code: Set(None),
      referred_by: Set(None),
      has_used_referral_discount: Set(false),
      created_at: Set(now),
      updated_at: Set(now),
    };

    Ok(user.insert(self.db).await?)
  }

  pub async fn by_id(&self, open_id: &str) -> Result<Option<user::Model>> {
    let user = user::Entity::find_by_id(open_id).one(self.db).await?;
    Ok(user)
  }

  pub async fn set_profile(
    &self,
    open_id: &str,
    school: &str,
    city: &str,
  ) -> Result<user::Model> {
    let user = user::Entity::find_by_id(open_id)
      .one(self.db)
      .await?
      .ok_or(Error::UserNotFound)?;

    let user = user::ActiveModel {
      school: Set(school.trim().to_string()),
      city: Set(city.trim().to_string()),
      updated_at: Set(now()),
      ..user.into()
    }
    .update(self.db)
    .await?;

    Ok(user)
  }

  /// Makes the user an agent of `level` responsible for `territories`:
  /// schools for level 1, regions for level 2. Replaces any territories
  /// the user held before.
  pub async fn promote(
    &self,
    open_id: &str,
    level: i32,
    territories: &[&str],
  ) -> Result<user::Model> {
    let kind = match level {
      1 => TerritoryKind::School,
      2 => TerritoryKind::Region,
      _ => {
        return Err(Error::InvalidArgs(format!("invalid agent level {level}")));
      }
    };

    let txn = self.db.begin().await?;

    let user = user::Entity::find_by_id(open_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;

    for name in territories {
      let holder = territory::Entity::find()
        .filter(territory::Column::Kind.eq(kind))
        .filter(territory::Column::Name.eq(*name))
        .filter(territory::Column::AgentId.ne(open_id))
        .one(&txn)
        .await?;
      if let Some(holder) = holder {
        return Err(Error::InvalidArgs(format!(
          "{name} is already managed by {}",
          holder.agent_id
        )));
      }
    }

    territory::Entity::delete_many()
      .filter(territory::Column::AgentId.eq(open_id))
      .exec(&txn)
      .await?;

    for name in territories {
      territory::ActiveModel {
        kind: Set(kind),
        name: Set(name.to_string()),
        agent_id: Set(open_id.to_string()),
        ..Default::default()
      }
      .insert(&txn)
      .await?;
    }

    let user = user::ActiveModel {
      is_agent: Set(true),
      agent_level: Set(level),
      updated_at: Set(now()),
      ..user.into()
    }
    .update(&txn)
    .await?;

    txn.commit().await?;
    info!("{open_id} promoted to level {level} agent of {territories:?}");

    Ok(user)
  }

  pub async fn demote(&self, open_id: &str) -> Result<()> {
    let txn = self.db.begin().await?;

    let user = user::Entity::find_by_id(open_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;

    territory::Entity::delete_many()
      .filter(territory::Column::AgentId.eq(open_id))
      .exec(&txn)
      .await?;

    user::ActiveModel {
      is_agent: Set(false),
      agent_level: Set(0),
      updated_at: Set(now()),
      ..user.into()
    }
    .update(&txn)
    .await?;

    txn.commit().await?;
    Ok(())
  }

  /// The agent responsible for a school or region, if any.
  pub async fn agent_for<C: ConnectionTrait>(
    conn: &C,
    kind: TerritoryKind,
    name: &str,
  ) -> Result<Option<user::Model>> {
    if name.is_empty() {
      return Ok(None);
    }

    let level = match kind {
      TerritoryKind::School => 1,
      TerritoryKind::Region => 2,
    };

    let agent = territory::Entity::find()
      .filter(territory::Column::Kind.eq(kind))
      .filter(territory::Column::Name.eq(name))
      .find_also_related(user::Entity)
      .one(conn)
      .await?
      .and_then(|(_, agent)| agent)
      .filter(|agent| agent.is_agent && agent.agent_level == level);

    Ok(agent)
  }

  /// Flags the one-time referral discount as consumed. Returns whether the
  /// flag changed.
  pub async fn mark_referral_discount_used<C: ConnectionTrait>(
    conn: &C,
    open_id: &str,
  ) -> Result<bool> {
    let res = user::Entity::update_many()
      .col_expr(user::Column::HasUsedReferralDiscount, Expr::value(true))
      .col_expr(user::Column::UpdatedAt, Expr::value(now()))
      .filter(user::Column::OpenId.eq(open_id))
      .filter(user::Column::HasUsedReferralDiscount.eq(false))
      .exec(conn)
      .await?;

    Ok(res.rows_affected > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::test_utils::test_db;

  #[tokio::test]
  async fn test_get_or_create_is_idempotent() {
    let db = test_db::setup().await;
    let sv = User::new(&db);

    let first = sv.get_or_create("o_alice", "Alice").await.unwrap();
    let second = sv.get_or_create("o_alice", "Someone else").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.user_name, "Alice");
    assert!(!second.is_agent);
  }

  #[tokio::test]
  async fn test_promote_assigns_territories() {
    let db = test_db::setup().await;
    let sv = User::new(&db);
    sv.get_or_create("o_agent", "Agent").await.unwrap();

    let agent = sv.promote("o_agent", 1, &["North High"]).await.unwrap();
    assert!(agent.is_school_agent());

    let found = User::agent_for(&db, TerritoryKind::School, "North High")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(found.open_id, "o_agent");

    let none = User::agent_for(&db, TerritoryKind::Region, "North High")
      .await
      .unwrap();
    assert!(none.is_none());
  }

  #[tokio::test]
  async fn test_territory_has_single_agent() {
    let db = test_db::setup().await;
    let sv = User::new(&db);
    sv.get_or_create("o_a", "A").await.unwrap();
    sv.get_or_create("o_b", "B").await.unwrap();
    sv.promote("o_a", 2, &["Hangzhou"]).await.unwrap();

    let result = sv.promote("o_b", 2, &["Hangzhou"]).await;
    assert!(matches!(result, Err(Error::InvalidArgs(_))));
  }

  #[tokio::test]
  async fn test_demoted_agent_is_not_resolved() {
    let db = test_db::setup().await;
    let sv = User::new(&db);
    sv.get_or_create("o_agent", "Agent").await.unwrap();
    sv.promote("o_agent", 2, &["Suzhou"]).await.unwrap();

    sv.demote("o_agent").await.unwrap();

    let found = User::agent_for(&db, TerritoryKind::Region, "Suzhou")
      .await
      .unwrap();
    assert!(found.is_none());
  }

  #[tokio::test]
  async fn test_referral_discount_flag_flips_once() {
    let db = test_db::setup().await;
    User::new(&db).get_or_create("o_bob", "Bob").await.unwrap();

    assert!(User::mark_referral_discount_used(&db, "o_bob").await.unwrap());
    assert!(!User::mark_referral_discount_used(&db, "o_bob").await.unwrap());
  }
}
