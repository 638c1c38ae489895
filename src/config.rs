use std::{env, path::PathBuf, str::FromStr};

use anyhow::Context;

use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct WechatConfig {
  pub app_id: String,
  pub app_secret: String,
  pub mch_id: String,
  /// Serial number of the merchant API certificate.
  pub mch_serial: String,
  pub api_v3_key: String,
  pub private_key_path: PathBuf,
  pub public_key_path: PathBuf,
  /// Id of the platform public key; notifications signed by any other key
  /// are rejected.
  pub public_key_id: String,
  pub api_url: String,
  pub mch_api_url: String,
  /// Payment notifications land here, payout ones under `/transfer`.
  pub notify_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub port: u16,
  pub wechat: WechatConfig,
  pub http_timeout: Duration,
  /// Upper bound for a single settlement operation.
  pub op_timeout: Duration,
  /// Pending commissions older than this are settled.
  pub settle_after: Duration,
  pub settle_interval: Duration,
  pub retry_interval: Duration,
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    let base_url = var_or("BASE_API_URL", "http://localhost:3000");

    let wechat = WechatConfig {
      app_id: var("WECHAT_APP_ID")?,
      app_secret: var("WECHAT_APP_SECRET")?,
      mch_id: var("WECHAT_MCH_ID")?,
      mch_serial: var("WECHAT_MCH_CERTIFICATE_SERIAL_NUMBER")?,
      api_v3_key: var("WECHAT_MCH_API_V3_KEY")?,
      private_key_path: var_or(
        "WECHAT_MCH_PRIVATE_KEY_PATH",
        "certs/apiclient_key.pem",
      )
      .into(),
      public_key_path: var_or("WECHAT_PAY_PUBLIC_KEY_PATH", "certs/pub_key.pem")
        .into(),
      public_key_id: var_or("WECHAT_PAY_PUBLIC_KEY_ID", ""),
      api_url: var_or("WECHAT_API_URL", "https://api.weixin.qq.com"),
      mch_api_url: var_or("WECHAT_MCH_API_URL", "https://api.mch.weixin.qq.com"),
      notify_url: var_or(
        "WECHAT_NOTIFY_URL",
        &format!("{}/api/pay/notify", base_url.trim_end_matches('/')),
      ),
    };

    Ok(Self {
      database_url: var_or("DATABASE_URL", "sqlite:wordcard.db?mode=rwc"),
      port: parse_or("PORT", 3000)?,
      wechat,
      http_timeout: duration_or("HTTP_CLIENT_TIMEOUT", "30s")?,
      op_timeout: duration_or("OPERATION_TIMEOUT", "60s")?,
      settle_after: duration_or("COMMISSION_SETTLE_AFTER", "7days")?,
      settle_interval: duration_or("COMMISSION_SETTLE_INTERVAL", "1h")?,
      retry_interval: duration_or("SETTLEMENT_RETRY_INTERVAL", "5m")?,
    })
  }
}

fn var(key: &str) -> anyhow::Result<String> {
  env::var(key).with_context(|| format!("{key} not set"))
}

fn var_or(key: &str, default: &str) -> String {
  env::var(key)
    .ok()
    .filter(|v| !v.trim().is_empty())
    .unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match env::var(key) {
    Ok(raw) => raw.trim().parse().with_context(|| format!("invalid {key}")),
    Err(_) => Ok(default),
  }
}

fn duration_or(key: &str, default: &str) -> anyhow::Result<Duration> {
  let raw = var_or(key, default);
  humantime::parse_duration(&raw)
    .with_context(|| format!("invalid {key}: `{raw}`"))
}

#[cfg(test)]
impl Config {
  pub fn test() -> Self {
    Self {
      database_url: "sqlite::memory:".into(),
      port: 0,
      wechat: WechatConfig {
        app_id: "wx_test_app".into(),
        app_secret: "secret".into(),
        mch_id: "1900000001".into(),
        mch_serial: "MCH_SERIAL".into(),
        api_v3_key: "0123456789abcdef0123456789abcdef".into(),
        private_key_path: "certs/apiclient_key.pem".into(),
        public_key_path: "certs/pub_key.pem".into(),
        public_key_id: "PUB_KEY_ID_TEST".into(),
        api_url: "http://127.0.0.1:9".into(),
        mch_api_url: "http://127.0.0.1:9".into(),
        notify_url: "http://localhost/api/pay/notify".into(),
      },
      http_timeout: Duration::from_secs(5),
      op_timeout: Duration::from_secs(5),
      settle_after: Duration::from_secs(7 * 24 * 3600),
      settle_interval: Duration::from_secs(3600),
      retry_interval: Duration::from_secs(300),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_duration_parsing() {
    assert_eq!(
      humantime::parse_duration("30s").unwrap(),
      Duration::from_secs(30)
    );
    assert_eq!(
      duration_or("WORDCARD_TEST_UNSET_DURATION", "5m").unwrap(),
      Duration::from_secs(300)
    );
  }

  #[test]
  fn test_parse_or_default() {
    let port: u16 = parse_or("WORDCARD_TEST_UNSET_PORT", 3000).unwrap();
    assert_eq!(port, 3000);
  }
}
