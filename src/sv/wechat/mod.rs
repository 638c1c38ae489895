//! WeChat Pay API v3 and mini-program API integration.
//! API docs: https://pay.weixin.qq.com/doc/v3/merchant/4012791856
//!
//! Outbound calls go through [`Gateway`]; the production implementation is
//! [`WechatPay`]. Inbound notifications are verified against the platform
//! public key and decrypted with the merchant's API v3 key before any state
//! is touched.

mod client;
pub mod crypto;
#[cfg(test)]
pub mod mock;
pub mod token;

use async_trait::async_trait;
use axum::http::HeaderMap;
pub use client::WechatPay;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Signature headers attached to every inbound notification.
#[derive(Debug, Clone)]
pub struct NotifyHeaders {
  pub timestamp: String,
  pub nonce: String,
  pub signature: String,
  pub serial: String,
}

impl NotifyHeaders {
  pub const TIMESTAMP: &'static str = "Wechatpay-Timestamp";
  pub const NONCE: &'static str = "Wechatpay-Nonce";
  pub const SIGNATURE: &'static str = "Wechatpay-Signature";
  pub const SERIAL: &'static str = "Wechatpay-Serial";

  pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
    let get = |name: &'static str| {
      headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(Error::Notify(Notify::MissingHeader(name)))
    };

    Ok(Self {
      timestamp: get(Self::TIMESTAMP)?,
      nonce: get(Self::NONCE)?,
      signature: get(Self::SIGNATURE)?,
      serial: get(Self::SERIAL)?,
    })
  }
}

/// Notification envelope; the business payload is in `resource`.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
  pub id: String,
  pub event_type: String,
  #[serde(default)]
  pub summary: String,
  pub resource: Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
  pub algorithm: String,
  pub ciphertext: String,
  #[serde(default)]
  pub associated_data: String,
  pub nonce: String,
  #[serde(default)]
  pub original_type: String,
}

/// Decrypted payload of a `TRANSACTION.*` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
  pub out_trade_no: String,
  pub transaction_id: String,
  pub trade_state: String,
  #[serde(default)]
  pub trade_state_desc: String,
}

impl Transaction {
  pub fn is_success(&self) -> bool {
    self.trade_state == "SUCCESS"
  }
}

/// Decrypted payload of a `MCHTRANSFER.*` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferBill {
  pub out_bill_no: String,
  #[serde(default)]
  pub transfer_bill_no: Option<String>,
  pub state: String,
  #[serde(default)]
  pub fail_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentIntent {
  /// Merchant reference, the order id.
  pub out_trade_no: String,
  pub description: String,
  /// Cents, at least one.
  pub amount: i64,
  pub payer_open_id: String,
}

/// Parameters the mini-program passes to `wx.requestPayment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayParams {
  pub app_id: String,
  pub time_stamp: String,
  pub nonce_str: String,
  pub package: String,
  pub sign_type: String,
  pub pay_sign: String,
}

#[derive(Debug, Clone)]
pub struct Payout {
  pub out_bill_no: String,
  pub open_id: String,
  /// Cents.
  pub amount: i64,
  pub remark: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutReceipt {
  pub out_bill_no: String,
  pub transfer_bill_no: String,
  pub state: String,
  #[serde(default)]
  pub package_info: Option<String>,
}

#[async_trait]
pub trait Gateway: Send + Sync {
  /// Registers a JSAPI payment and returns signed client parameters.
  async fn prepay(&self, intent: &PaymentIntent) -> Result<PayParams>;

  /// Submits a merchant-to-user transfer.
  async fn transfer(&self, payout: &Payout) -> Result<PayoutReceipt>;

  /// Mini-program code image (PNG) for `scene` opening `page`.
  async fn wxacode(&self, scene: &str, page: &str) -> Result<Vec<u8>>;

  fn verify(&self, headers: &NotifyHeaders, body: &[u8]) -> Result<()>;

  fn decrypt(&self, resource: &Resource) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  #[test]
  fn test_headers_require_every_field() {
    let mut headers = HeaderMap::new();
    headers.insert(NotifyHeaders::TIMESTAMP, HeaderValue::from_static("1"));
    headers.insert(NotifyHeaders::NONCE, HeaderValue::from_static("n"));
    headers.insert(NotifyHeaders::SERIAL, HeaderValue::from_static("s"));

    let result = NotifyHeaders::from_headers(&headers);
    assert!(matches!(
      result,
      Err(Error::Notify(Notify::MissingHeader(NotifyHeaders::SIGNATURE)))
    ));

    headers.insert(NotifyHeaders::SIGNATURE, HeaderValue::from_static(" "));
    assert!(NotifyHeaders::from_headers(&headers).is_err());

    headers.insert(NotifyHeaders::SIGNATURE, HeaderValue::from_static("sig"));
    let parsed = NotifyHeaders::from_headers(&headers).unwrap();
    assert_eq!(parsed.signature, "sig");
  }
}
