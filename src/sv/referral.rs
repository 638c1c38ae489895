use sea_orm::sea_query::Expr;
use serde::Serialize;

use crate::{
  entity::{
    CommissionKind, CommissionStatus, commission, referral, referral_usage,
    user,
  },
  prelude::*,
  sv::{
    tier::{self, Bps},
    wechat::Gateway,
  },
  utils,
};

const CODE_LEN: usize = 8;
const CODE_ATTEMPTS: usize = 5;

/// Mini-program page opened by a referral code image.
pub const LANDING_PAGE: &str = "pages/index/index";

pub struct Referral<'a> {
  db: &'a DatabaseConnection,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralInfo {
  pub code: Option<String>,
  pub referred_by: Option<String>,
  pub referred_count: u64,
  pub referred_users: Vec<referral_usage::Model>,
  /// Cents, referral bonuses in any non-cancelled state.
  pub total_earned: i64,
  pub discount_rate: Bps,
  pub commission_rate: Bps,
}

impl<'a> Referral<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  /// Returns the user's code, issuing one on first use.
  pub async fn ensure_code(&self, owner_id: &str) -> Result<referral::Model> {
    if let Some(existing) = referral::Entity::find()
      .filter(referral::Column::OwnerId.eq(owner_id))
      .one(self.db)
      .await?
    {
      return Ok(existing);
    }

    for _ in 0..CODE_ATTEMPTS {
      let code = utils::random_code(CODE_LEN);
      match self.issue(owner_id, &code).await {
        Ok(model) => return Ok(model),
        Err(Error::Db(err)) if Error::is_conflict(&err) => {
          // either the code collided or a concurrent call issued one
          if let Some(existing) = referral::Entity::find()
            .filter(referral::Column::OwnerId.eq(owner_id))
            .one(self.db)
            .await?
          {
            return Ok(existing);
          }
          debug!("referral code {code} collided, retrying");
        }
        Err(err) => return Err(err),
      }
    }

    Err(Error::Internal("could not allocate a referral code".into()))
  }

  async fn issue(&self, owner_id: &str, code: &str) -> Result<referral::Model> {
    let txn = self.db.begin().await?;

    let owner = user::Entity::find_by_id(owner_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;

    let model = referral::ActiveModel {
      code: Set(code.to_string()),
      owner_id: Set(owner_id.to_string()),
      created_at: Set(now()),
    }
    .insert(&txn)
    .await?;

    user::ActiveModel {
      referral_code: Set(Some(code.to_string())),
      updated_at: Set(now()),
      ..owner.into()
    }
    .update(&txn)
    .await?;

    txn.commit().await?;
    info!("referral code {code} issued to {owner_id}");

    Ok(model)
  }

  pub async fn owner_of<C: ConnectionTrait>(
    conn: &C,
    code: &str,
  ) -> Result<Option<user::Model>> {
    let owner = referral::Entity::find_by_id(code.trim().to_uppercase())
      .find_also_related(user::Entity)
      .one(conn)
      .await?
      .and_then(|(_, owner)| owner);
    Ok(owner)
  }

  /// Binds a new user to the owner of `code`. A user can be referred once.
  pub async fn onboard(&self, user_id: &str, code: &str) -> Result<user::Model> {
    let code = code.trim().to_uppercase();
    let txn = self.db.begin().await?;

    let user = user::Entity::find_by_id(user_id)
      .one(&txn)
      .await?
      .ok_or(Error::UserNotFound)?;

    if user.referred_by.is_some() {
      return Err(Error::InvalidArgs("user already has a referrer".into()));
    }

    let owner =
      Self::owner_of(&txn, &code).await?.ok_or(Error::ReferralNotFound)?;
    if owner.open_id == user.open_id {
      return Err(Error::InvalidArgs("cannot use your own referral code".into()));
    }

    referral_usage::ActiveModel {
      code: Set(code.clone()),
      user_id: Set(user_id.to_string()),
      user_name: Set(user.user_name.clone()),
      used_at: Set(now()),
      ..Default::default()
    }
    .insert(&txn)
    .await?;

    let user = user::ActiveModel {
      referred_by: Set(Some(code.clone())),
      updated_at: Set(now()),
      ..user.into()
    }
    .update(&txn)
    .await?;

    txn.commit().await?;
    info!("{user_id} onboarded with code {code} of {}", owner.open_id);

    Ok(user)
  }

  pub async fn info(&self, user_id: &str) -> Result<ReferralInfo> {
    let user = user::Entity::find_by_id(user_id)
      .one(self.db)
      .await?
      .ok_or(Error::UserNotFound)?;

    let referred_users = match &user.referral_code {
      Some(code) => {
        referral_usage::Entity::find()
          .filter(referral_usage::Column::Code.eq(code.as_str()))
          .order_by_desc(referral_usage::Column::UsedAt)
          .all(self.db)
          .await?
      }
      None => Vec::new(),
    };

    let total_earned = commission::Entity::find()
      .select_only()
      .column_as(Expr::col(commission::Column::Amount).sum(), "total")
      .filter(commission::Column::BeneficiaryId.eq(user_id))
      .filter(commission::Column::Kind.eq(CommissionKind::Referral))
      .filter(commission::Column::Status.ne(CommissionStatus::Cancelled))
      .into_tuple::<Option<i64>>()
      .one(self.db)
      .await?
      .flatten()
      .unwrap_or(0);

    Ok(ReferralInfo {
      code: user.referral_code,
      referred_by: user.referred_by,
      referred_count: referred_users.len() as u64,
      referred_users,
      total_earned,
      discount_rate: tier::referral_discount_rate(user.agent_level),
      commission_rate: tier::level_commission_rate(user.agent_level),
    })
  }

  /// PNG mini-program code that opens the landing page with the user's
  /// referral code as scene.
  pub async fn share_image(
    &self,
    gateway: &dyn Gateway,
    owner_id: &str,
  ) -> Result<Vec<u8>> {
    let referral = self.ensure_code(owner_id).await?;
    gateway.wxacode(&referral.code, LANDING_PAGE).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::{User, test_utils::test_db, wechat::mock::MockGateway};

  #[tokio::test]
  async fn test_ensure_code_is_stable() {
    let db = test_db::setup().await;
    User::new(&db).get_or_create("o_owner", "Owner").await.unwrap();
    let sv = Referral::new(&db);

    let first = sv.ensure_code("o_owner").await.unwrap();
    let second = sv.ensure_code("o_owner").await.unwrap();

    assert_eq!(first.code, second.code);
    assert_eq!(first.code.len(), CODE_LEN);

    let owner = User::new(&db).by_id("o_owner").await.unwrap().unwrap();
    assert_eq!(owner.referral_code, Some(first.code));
  }

  #[tokio::test]
  async fn test_ensure_code_unknown_user() {
    let db = test_db::setup().await;

    let result = Referral::new(&db).ensure_code("o_ghost").await;
    assert!(matches!(result, Err(Error::UserNotFound)));
  }

  #[tokio::test]
  async fn test_onboard_once() {
    let db = test_db::setup().await;
    let users = User::new(&db);
    users.get_or_create("o_owner", "Owner").await.unwrap();
    users.get_or_create("o_new", "Newcomer").await.unwrap();
    let sv = Referral::new(&db);
    let code = sv.ensure_code("o_owner").await.unwrap().code;

    let user = sv.onboard("o_new", &code.to_lowercase()).await.unwrap();
    assert_eq!(user.referred_by, Some(code.clone()));

    let again = sv.onboard("o_new", &code).await;
    assert!(matches!(again, Err(Error::InvalidArgs(_))));

    let info = sv.info("o_owner").await.unwrap();
    assert_eq!(info.referred_count, 1);
    assert_eq!(info.referred_users[0].user_name, "Newcomer");
    assert_eq!(info.total_earned, 0);
    assert_eq!(info.discount_rate, 500);
    assert_eq!(info.commission_rate, 100);
  }

  #[tokio::test]
  async fn test_info_rates_follow_agent_level() {
    let db = test_db::setup().await;
    let users = User::new(&db);
    users.get_or_create("o_agent", "Agent").await.unwrap();
    users.promote("o_agent", 2, &["East District"]).await.unwrap();

    let info = Referral::new(&db).info("o_agent").await.unwrap();
    assert_eq!(info.discount_rate, 1500);
    assert_eq!(info.commission_rate, 500);
  }

  #[tokio::test]
  async fn test_onboard_rejects_own_and_unknown_codes() {
    let db = test_db::setup().await;
    User::new(&db).get_or_create("o_owner", "Owner").await.unwrap();
    let sv = Referral::new(&db);
    let code = sv.ensure_code("o_owner").await.unwrap().code;

    let own = sv.onboard("o_owner", &code).await;
    assert!(matches!(own, Err(Error::InvalidArgs(_))));

    let unknown = sv.onboard("o_owner", "NOPE0000").await;
    assert!(matches!(unknown, Err(Error::ReferralNotFound)));
  }

  #[tokio::test]
  async fn test_share_image_uses_code_as_scene() {
    let db = test_db::setup().await;
    User::new(&db).get_or_create("o_owner", "Owner").await.unwrap();
    let gateway = MockGateway::new();
    let sv = Referral::new(&db);

    let image = sv.share_image(&gateway, "o_owner").await.unwrap();
    let code = sv.ensure_code("o_owner").await.unwrap().code;
    assert_eq!(image, format!("PNG:{code}").into_bytes());
  }
}
