use async_trait::async_trait;
use reqwest::{
  Client,
  header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{
  Gateway, NotifyHeaders, PayParams, PaymentIntent, Payout, PayoutReceipt,
  Resource,
  crypto::{self, MerchantKey, PlatformKey},
  token::TokenCache,
};
use crate::{config::WechatConfig, prelude::*, utils};

const JSAPI_PATH: &str = "/v3/pay/transactions/jsapi";
const TRANSFER_PATH: &str = "/v3/fund-app/mch-transfer/transfer-bills";

/// Transfer scene for commission payouts to promoters.
const TRANSFER_SCENE_ID: &str = "1005";

#[derive(Debug, Deserialize)]
struct ApiError {
  code: String,
  message: String,
}

#[derive(Serialize)]
struct Amount {
  total: i64,
  currency: &'static str,
}

#[derive(Serialize)]
struct Payer<'a> {
  openid: &'a str,
}

#[derive(Serialize)]
struct JsapiRequest<'a> {
  appid: &'a str,
  mchid: &'a str,
  description: &'a str,
  out_trade_no: &'a str,
  notify_url: &'a str,
  amount: Amount,
  payer: Payer<'a>,
}

#[derive(Deserialize)]
struct JsapiResponse {
  prepay_id: String,
}

#[derive(Serialize)]
struct SceneReport {
  info_type: &'static str,
  info_content: &'static str,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
  appid: &'a str,
  out_bill_no: &'a str,
  transfer_scene_id: &'static str,
  openid: &'a str,
  transfer_amount: i64,
  transfer_remark: &'a str,
  notify_url: String,
  user_recv_perception: &'static str,
  transfer_scene_report_infos: [SceneReport; 2],
}

#[derive(Deserialize)]
struct TokenResponse {
  #[serde(default)]
  access_token: String,
  #[serde(default)]
  expires_in: u64,
  #[serde(default)]
  errcode: i64,
  #[serde(default)]
  errmsg: String,
}

#[derive(Deserialize)]
struct WxaError {
  errcode: i64,
  errmsg: String,
}

fn request_error(err: reqwest::Error) -> Error {
  if err.is_timeout() {
    Error::Timeout
  } else {
    Error::Gateway(format!("Request failed: {err}"))
  }
}

/// WeChat Pay client for payments, payouts and mini-program codes.
pub struct WechatPay {
  client: Client,
  config: WechatConfig,
  merchant: MerchantKey,
  platform: PlatformKey,
  tokens: TokenCache,
}

impl WechatPay {
  pub fn new(
    config: WechatConfig,
    merchant: MerchantKey,
    platform: PlatformKey,
    timeout: Duration,
  ) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Internal(format!("http client: {e}")))?;

    Ok(Self { client, config, merchant, platform, tokens: TokenCache::default() })
  }

  /// Loads both keys from the PEM files named in `config`.
  pub fn from_config(
    config: &WechatConfig,
    timeout: Duration,
  ) -> anyhow::Result<Self> {
    use anyhow::Context;

    let merchant = std::fs::read_to_string(&config.private_key_path)
      .with_context(|| {
        format!("reading {}", config.private_key_path.display())
      })?;
    let platform = std::fs::read_to_string(&config.public_key_path)
      .with_context(|| format!("reading {}", config.public_key_path.display()))?;

    Ok(Self::new(
      config.clone(),
      MerchantKey::from_pem(&merchant)?,
      PlatformKey::from_pem(&platform, config.public_key_id.clone())?,
      timeout,
    )?)
  }

  /// Make a signed POST request to the merchant API
  async fn post<T: DeserializeOwned, B: Serialize>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let body = json::to_string(body)
      .map_err(|e| Error::Internal(format!("encoding request: {e}")))?;
    let authorization = crypto::authorization(
      &self.config.mch_id,
      &self.config.mch_serial,
      &self.merchant,
      "POST",
      path,
      &body,
    )?;

    let response = self
      .client
      .post(format!("{}{}", self.config.mch_api_url, path))
      .header(AUTHORIZATION, authorization)
      .header(ACCEPT, "application/json")
      .header(CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await
      .map_err(request_error)?;

    let status = response.status();
    let text = response.text().await.map_err(request_error)?;

    if !status.is_success() {
      let err = json::from_str::<ApiError>(&text).map_or_else(
        |_| format!("HTTP {status}"),
        |e| format!("{}: {}", e.code, e.message),
      );
      return Err(Error::Gateway(err));
    }

    json::from_str(&text)
      .map_err(|e| Error::Gateway(format!("Failed to parse response: {e}")))
  }

  async fn fetch_token(&self) -> Result<(String, Duration)> {
    let response: TokenResponse = self
      .client
      .get(format!("{}/cgi-bin/token", self.config.api_url))
      .query(&[
        ("grant_type", "client_credential"),
        ("appid", self.config.app_id.as_str()),
        ("secret", self.config.app_secret.as_str()),
      ])
      .send()
      .await
      .map_err(request_error)?
      .json()
      .await
      .map_err(|e| Error::Gateway(format!("Failed to parse response: {e}")))?;

    if response.errcode != 0 || response.access_token.is_empty() {
      return Err(Error::Gateway(format!(
        "access token: {} {}",
        response.errcode, response.errmsg
      )));
    }

    Ok((response.access_token, Duration::from_secs(response.expires_in)))
  }

  pub async fn access_token(&self) -> Result<String> {
    self.tokens.get_or_refresh(|| self.fetch_token()).await
  }

  /// Client parameters for `wx.requestPayment`.
  fn pay_params(&self, prepay_id: &str) -> Result<PayParams> {
    let time_stamp = Utc::now().timestamp().to_string();
    let nonce_str = utils::random_hex(32);
    let package = format!("prepay_id={prepay_id}");
    let message = format!(
      "{}\n{}\n{}\n{}\n",
      self.config.app_id, time_stamp, nonce_str, package
    );

    Ok(PayParams {
      app_id: self.config.app_id.clone(),
      pay_sign: self.merchant.sign(&message)?,
      time_stamp,
      nonce_str,
      package,
      sign_type: "RSA".into(),
    })
  }
}

#[async_trait]
impl Gateway for WechatPay {
  async fn prepay(&self, intent: &PaymentIntent) -> Result<PayParams> {
    let request = JsapiRequest {
      appid: &self.config.app_id,
      mchid: &self.config.mch_id,
      description: &intent.description,
      out_trade_no: &intent.out_trade_no,
      notify_url: &self.config.notify_url,
      amount: Amount { total: intent.amount.max(1), currency: "CNY" },
      payer: Payer { openid: &intent.payer_open_id },
    };

    let response: JsapiResponse = self.post(JSAPI_PATH, &request).await?;
    info!("prepay registered for order {}", intent.out_trade_no);

    self.pay_params(&response.prepay_id)
  }

  async fn transfer(&self, payout: &Payout) -> Result<PayoutReceipt> {
    let request = TransferRequest {
      appid: &self.config.app_id,
      out_bill_no: &payout.out_bill_no,
      transfer_scene_id: TRANSFER_SCENE_ID,
      openid: &payout.open_id,
      transfer_amount: payout.amount,
      transfer_remark: &payout.remark,
      notify_url: format!(
        "{}/transfer",
        self.config.notify_url.trim_end_matches('/')
      ),
      user_recv_perception: "劳务报酬",
      transfer_scene_report_infos: [
        SceneReport { info_type: "岗位类型", info_content: "代理推荐员" },
        SceneReport { info_type: "报酬说明", info_content: "代理推荐佣金结算" },
      ],
    };

    let receipt: PayoutReceipt = self.post(TRANSFER_PATH, &request).await?;
    info!(
      "transfer {} accepted as {} ({})",
      receipt.out_bill_no, receipt.transfer_bill_no, receipt.state
    );

    Ok(receipt)
  }

  async fn wxacode(&self, scene: &str, page: &str) -> Result<Vec<u8>> {
    let token = self.access_token().await?;

    let response = self
      .client
      .post(format!("{}/wxa/getwxacodeunlimit", self.config.api_url))
      .query(&[("access_token", token.as_str())])
      .json(&json::json!({
        "scene": scene,
        "page": page,
        "check_path": false,
      }))
      .send()
      .await
      .map_err(request_error)?;

    let is_json = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v.starts_with("application/json"));
    let bytes = response.bytes().await.map_err(request_error)?;

    if is_json {
      let err = json::from_slice::<WxaError>(&bytes).map_err(|e| {
        Error::Gateway(format!("Failed to parse response: {e}"))
      })?;
      // 40001: token revoked before its advertised expiry
      if err.errcode == 40001 {
        self.tokens.invalidate().await;
      }
      return Err(Error::Gateway(format!("wxacode: {} {}", err.errcode, err.errmsg)));
    }

    Ok(bytes.to_vec())
  }

  fn verify(&self, headers: &NotifyHeaders, body: &[u8]) -> Result<()> {
    self.platform.verify(headers, body)
  }

  fn decrypt(&self, resource: &Resource) -> Result<Vec<u8>> {
    crypto::decrypt(
      self.config.api_v3_key.as_bytes(),
      &resource.nonce,
      &resource.associated_data,
      &resource.ciphertext,
    )
  }
}

#[cfg(test)]
mod tests {
  use base64::{Engine, engine::general_purpose::STANDARD};
  use rsa::{
    pkcs1v15::{Signature, VerifyingKey},
    signature::Verifier,
  };
  use sha2::Sha256;

  use super::*;
  use crate::{config::Config, sv::wechat::mock};

  fn client() -> WechatPay {
    let key = mock::test_key();
    WechatPay::new(
      Config::test().wechat,
      MerchantKey::new(key.clone()),
      PlatformKey::new(key.to_public_key(), "PUB_KEY_ID_TEST"),
      Duration::from_secs(1),
    )
    .unwrap()
  }

  #[test]
  fn test_pay_params_are_signed_by_merchant() {
    let wechat = client();
    let params = wechat.pay_params("wx201410272009395522657a690389285100").unwrap();

    assert_eq!(params.package, "prepay_id=wx201410272009395522657a690389285100");
    assert_eq!(params.sign_type, "RSA");

    let message = format!(
      "{}\n{}\n{}\n{}\n",
      params.app_id, params.time_stamp, params.nonce_str, params.package
    );
    let raw = STANDARD.decode(&params.pay_sign).unwrap();
    let signature = Signature::try_from(raw.as_slice()).unwrap();
    VerifyingKey::<Sha256>::new(mock::test_key().to_public_key())
      .verify(message.as_bytes(), &signature)
      .unwrap();
  }

  #[tokio::test]
  async fn test_unreachable_gateway_is_reported() {
    let wechat = client();
    let payout = Payout {
      out_bill_no: "WD1".into(),
      open_id: "o1".into(),
      amount: 990,
      remark: "commission".into(),
    };

    let result = wechat.transfer(&payout).await;
    assert!(matches!(result, Err(Error::Gateway(_) | Error::Timeout)));
  }
}
