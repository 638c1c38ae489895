//! In-memory gateway for tests. Notifications it produces are really
//! signed and encrypted, so the verification path runs unchanged.

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use rsa::RsaPrivateKey;

use super::{
  Gateway, NotifyHeaders, PayParams, PaymentIntent, Payout, PayoutReceipt,
  Resource,
  crypto::{self, MerchantKey, PlatformKey},
};
use crate::{prelude::*, utils};

pub const SERIAL: &str = "MOCK_PLATFORM_SERIAL";
pub const API_V3_KEY: &str = "0123456789abcdef0123456789abcdef";

/// Key generation is slow in debug builds, share one per test binary.
pub fn test_key() -> &'static RsaPrivateKey {
  static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
  KEY.get_or_init(|| {
    RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
  })
}

#[derive(Default)]
struct State {
  prepays: Vec<PaymentIntent>,
  payouts: Vec<Payout>,
  fail_transfers: bool,
  transfer_state: Option<String>,
  transfer_delay: Option<Duration>,
}

pub struct MockGateway {
  signer: MerchantKey,
  platform: PlatformKey,
  state: Mutex<State>,
}

impl Default for MockGateway {
  fn default() -> Self {
    Self::new()
  }
}

impl MockGateway {
  pub fn new() -> Self {
    let key = test_key();
    Self {
      signer: MerchantKey::new(key.clone()),
      platform: PlatformKey::new(key.to_public_key(), SERIAL),
      state: Mutex::new(State::default()),
    }
  }

  pub fn fail_transfers(&self, fail: bool) {
    self.state.lock().unwrap().fail_transfers = fail;
  }

  /// State reported by the next transfer receipts, `ACCEPTED` by default.
  pub fn transfer_state(&self, state: &str) {
    self.state.lock().unwrap().transfer_state = Some(state.to_string());
  }

  pub fn delay_transfers(&self, delay: Duration) {
    self.state.lock().unwrap().transfer_delay = Some(delay);
  }

  pub fn payouts(&self) -> Vec<Payout> {
    self.state.lock().unwrap().payouts.clone()
  }

  pub fn prepays(&self) -> Vec<PaymentIntent> {
    self.state.lock().unwrap().prepays.clone()
  }

  /// Builds a signed notification carrying `payload` as its resource.
  pub fn notification(
    &self,
    event_type: &str,
    original_type: &str,
    payload: &json::Value,
  ) -> (HeaderMap, Vec<u8>) {
    let nonce = utils::random_hex(12);
    let ciphertext = crypto::encrypt(
      API_V3_KEY.as_bytes(),
      &nonce,
      original_type,
      payload.to_string().as_bytes(),
    );

    let body = json::json!({
      "id": format!("EV-{}", utils::random_hex(8)),
      "create_time": "2025-10-20T10:00:00+08:00",
      "resource_type": "encrypt-resource",
      "event_type": event_type,
      "summary": "mock",
      "resource": {
        "original_type": original_type,
        "algorithm": "AEAD_AES_256_GCM",
        "ciphertext": ciphertext,
        "associated_data": original_type,
        "nonce": nonce,
      },
    })
    .to_string()
    .into_bytes();

    (self.sign(&body), body)
  }

  pub fn sign(&self, body: &[u8]) -> HeaderMap {
    let timestamp = Utc::now().timestamp().to_string();
    let nonce = utils::random_hex(32);
    let message = crypto::notify_message(&timestamp, &nonce, body);
    let signature =
      self.signer.sign(&String::from_utf8_lossy(&message)).unwrap();

    let mut headers = HeaderMap::new();
    for (name, value) in [
      (NotifyHeaders::TIMESTAMP, timestamp),
      (NotifyHeaders::NONCE, nonce),
      (NotifyHeaders::SIGNATURE, signature),
      (NotifyHeaders::SERIAL, SERIAL.to_string()),
    ] {
      headers.insert(name, HeaderValue::from_str(&value).unwrap());
    }
    headers
  }

  pub fn payment(&self, order_id: &str, transaction_id: &str) -> (HeaderMap, Vec<u8>) {
    self.notification(
      "TRANSACTION.SUCCESS",
      "transaction",
      &json::json!({
        "out_trade_no": order_id,
        "transaction_id": transaction_id,
        "trade_state": "SUCCESS",
        "trade_state_desc": "paid",
      }),
    )
  }

  pub fn transfer_update(
    &self,
    out_bill_no: &str,
    state: &str,
    fail_reason: Option<&str>,
  ) -> (HeaderMap, Vec<u8>) {
    self.notification(
      "MCHTRANSFER.BILL.FINISHED",
      "mch_payment",
      &json::json!({
        "out_bill_no": out_bill_no,
        "transfer_bill_no": format!("TB{out_bill_no}"),
        "state": state,
        "fail_reason": fail_reason,
      }),
    )
  }
}

#[async_trait]
impl Gateway for MockGateway {
  async fn prepay(&self, intent: &PaymentIntent) -> Result<PayParams> {
    self.state.lock().unwrap().prepays.push(intent.clone());
    Ok(PayParams {
      app_id: "wx_test_app".into(),
      time_stamp: Utc::now().timestamp().to_string(),
      nonce_str: utils::random_hex(32),
      package: format!("prepay_id=mock_{}", intent.out_trade_no),
      sign_type: "RSA".into(),
      pay_sign: "mock".into(),
    })
  }

  async fn transfer(&self, payout: &Payout) -> Result<PayoutReceipt> {
    let delay = self.state.lock().unwrap().transfer_delay;
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let mut state = self.state.lock().unwrap();
    if state.fail_transfers {
      return Err(Error::Gateway("NOT_ENOUGH: merchant balance".into()));
    }
    state.payouts.push(payout.clone());

    Ok(PayoutReceipt {
      out_bill_no: payout.out_bill_no.clone(),
      transfer_bill_no: format!("TB{}", payout.out_bill_no),
      state: state.transfer_state.clone().unwrap_or_else(|| "ACCEPTED".into()),
      package_info: None,
    })
  }

  async fn wxacode(&self, scene: &str, _page: &str) -> Result<Vec<u8>> {
    Ok(format!("PNG:{scene}").into_bytes())
  }

  fn verify(&self, headers: &NotifyHeaders, body: &[u8]) -> Result<()> {
    self.platform.verify(headers, body)
  }

  fn decrypt(&self, resource: &Resource) -> Result<Vec<u8>> {
    crypto::decrypt(
      API_V3_KEY.as_bytes(),
      &resource.nonce,
      &resource.associated_data,
      &resource.ciphertext,
    )
  }
}
