use std::future::Future;

use sea_orm::ConnectOptions;

use crate::{
  config::Config,
  prelude::*,
  sv::{
    self,
    wechat::{Gateway, WechatPay},
  },
  utils,
};

pub struct AppState {
  pub db: DatabaseConnection,
  pub config: Config,
  pub gateway: Arc<dyn Gateway>,
}

/// Services bound to the shared connection pool.
pub struct Services<'a> {
  pub user: sv::User<'a>,
  pub referral: sv::Referral<'a>,
  pub cart: sv::Cart<'a>,
  pub order: sv::Order<'a>,
  pub commission: sv::Commission<'a>,
  pub balance: sv::Balance<'a, DatabaseConnection>,
  pub withdrawal: sv::Withdrawal<'a>,
  pub reconciler: sv::Reconciler<'a>,
  pub failures: sv::Failures<'a>,
}

impl AppState {
  pub async fn new(config: Config) -> anyhow::Result<Self> {
    let mut opts = ConnectOptions::new(&config.database_url);
    opts
      .max_connections(16)
      .acquire_timeout(config.op_timeout)
      .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    Migrator::up(&db, None).await?;

    let gateway = WechatPay::from_config(&config.wechat, config.http_timeout)?;

    Ok(Self::with_gateway(db, config, Arc::new(gateway)))
  }

  pub fn with_gateway(
    db: DatabaseConnection,
    config: Config,
    gateway: Arc<dyn Gateway>,
  ) -> Self {
    Self { db, config, gateway }
  }

  pub fn sv(&self) -> Services<'_> {
    let db = &self.db;
    let gateway = self.gateway.as_ref();

    Services {
      user: sv::User::new(db),
      referral: sv::Referral::new(db),
      cart: sv::Cart::new(db),
      order: sv::Order::new(db),
      commission: sv::Commission::new(db),
      balance: sv::Balance::new(db),
      withdrawal: sv::Withdrawal::new(db, gateway)
        .with_timeout(self.config.op_timeout),
      reconciler: sv::Reconciler::new(db, gateway)
        .with_timeout(self.config.op_timeout),
      failures: sv::Failures::new(db),
    }
  }

  /// Runs `fut` under the operation timeout.
  pub async fn bounded<T>(
    &self,
    fut: impl Future<Output = Result<T>>,
  ) -> Result<T> {
    utils::within(self.config.op_timeout, fut).await
  }
}
