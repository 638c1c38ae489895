use aes_gcm::{
  Aes256Gcm, KeyInit, Nonce,
  aead::{Aead, Payload},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::{
  RsaPrivateKey, RsaPublicKey,
  pkcs1v15::{Signature, SigningKey, VerifyingKey},
  pkcs8::{DecodePrivateKey, DecodePublicKey},
  signature::{SignatureEncoding, Signer, Verifier},
};
use sha2::Sha256;

use super::NotifyHeaders;
use crate::{prelude::*, utils};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seconds a notification timestamp may drift from local time.
pub const MAX_CLOCK_SKEW: i64 = 300;

/// Merchant private key, signs outbound requests and client pay parameters.
pub struct MerchantKey(SigningKey<Sha256>);

impl MerchantKey {
  pub fn new(key: RsaPrivateKey) -> Self {
    Self(SigningKey::<Sha256>::new(key))
  }

  pub fn from_pem(pem: &str) -> Result<Self> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem)
      .map_err(|e| Error::Internal(format!("invalid merchant key: {e}")))?;
    Ok(Self::new(key))
  }

  /// SHA256withRSA, base64 encoded.
  pub fn sign(&self, message: &str) -> Result<String> {
    let signature = self
      .0
      .try_sign(message.as_bytes())
      .map_err(|e| Error::Internal(format!("signing failed: {e}")))?;
    Ok(STANDARD.encode(signature.to_bytes()))
  }
}

/// Platform public key, verifies inbound notifications.
pub struct PlatformKey {
  key: VerifyingKey<Sha256>,
  serial: String,
}

impl PlatformKey {
  /// An empty `serial` accepts any serial header.
  pub fn new(key: RsaPublicKey, serial: impl Into<String>) -> Self {
    Self { key: VerifyingKey::<Sha256>::new(key), serial: serial.into() }
  }

  pub fn from_pem(pem: &str, serial: impl Into<String>) -> Result<Self> {
    let key = RsaPublicKey::from_public_key_pem(pem)
      .map_err(|e| Error::Internal(format!("invalid platform key: {e}")))?;
    Ok(Self::new(key, serial))
  }

  pub fn verify(&self, headers: &NotifyHeaders, body: &[u8]) -> Result<()> {
    self.verify_at(headers, body, Utc::now().timestamp())
  }

  fn verify_at(
    &self,
    headers: &NotifyHeaders,
    body: &[u8],
    now: i64,
  ) -> Result<()> {
    if !self.serial.is_empty() && headers.serial != self.serial {
      return Err(Notify::UnknownSerial(headers.serial.clone()).into());
    }

    let timestamp: i64 =
      headers.timestamp.parse().map_err(|_| Notify::Stale)?;
    if (now - timestamp).abs() > MAX_CLOCK_SKEW {
      return Err(Notify::Stale.into());
    }

    let raw =
      STANDARD.decode(&headers.signature).map_err(|_| Notify::BadSignature)?;
    let signature =
      Signature::try_from(raw.as_slice()).map_err(|_| Notify::BadSignature)?;

    let message = notify_message(&headers.timestamp, &headers.nonce, body);
    self
      .key
      .verify(&message, &signature)
      .map_err(|_| Notify::BadSignature)?;

    Ok(())
  }
}

/// `timestamp\nnonce\nbody\n`, the string the platform signs.
pub fn notify_message(timestamp: &str, nonce: &str, body: &[u8]) -> Vec<u8> {
  let mut message =
    Vec::with_capacity(timestamp.len() + nonce.len() + body.len() + 3);
  message.extend_from_slice(timestamp.as_bytes());
  message.push(b'\n');
  message.extend_from_slice(nonce.as_bytes());
  message.push(b'\n');
  message.extend_from_slice(body);
  message.push(b'\n');
  message
}

/// Value of the `Authorization` header for an API v3 request.
pub fn authorization(
  mch_id: &str,
  serial: &str,
  key: &MerchantKey,
  method: &str,
  path: &str,
  body: &str,
) -> Result<String> {
  let timestamp = Utc::now().timestamp();
  let nonce = utils::random_hex(32);
  let message = format!("{method}\n{path}\n{timestamp}\n{nonce}\n{body}\n");
  let signature = key.sign(&message)?;

  Ok(format!(
    "WECHATPAY2-SHA256-RSA2048 mchid=\"{mch_id}\",nonce_str=\"{nonce}\",\
     signature=\"{signature}\",timestamp=\"{timestamp}\",serial_no=\"{serial}\""
  ))
}

/// Opens an `AEAD_AES_256_GCM` resource.
pub fn decrypt(
  api_v3_key: &[u8],
  nonce: &str,
  associated_data: &str,
  ciphertext: &str,
) -> Result<Vec<u8>> {
  if api_v3_key.len() != KEY_LEN {
    return Err(Error::Decrypt(format!(
      "api v3 key must be {KEY_LEN} bytes, got {}",
      api_v3_key.len()
    )));
  }
  if nonce.len() != NONCE_LEN {
    return Err(Error::Decrypt(format!("nonce must be {NONCE_LEN} bytes")));
  }

  let ciphertext = STANDARD
    .decode(ciphertext)
    .map_err(|e| Error::Decrypt(format!("ciphertext is not base64: {e}")))?;
  let cipher = Aes256Gcm::new_from_slice(api_v3_key)
    .map_err(|_| Error::Decrypt("invalid key".into()))?;

  cipher
    .decrypt(
      Nonce::from_slice(nonce.as_bytes()),
      Payload { msg: &ciphertext, aad: associated_data.as_bytes() },
    )
    .map_err(|_| Error::Decrypt("authentication tag mismatch".into()))
}

#[cfg(test)]
pub fn encrypt(
  api_v3_key: &[u8],
  nonce: &str,
  associated_data: &str,
  plaintext: &[u8],
) -> String {
  let cipher = Aes256Gcm::new_from_slice(api_v3_key).unwrap();
  let sealed = cipher
    .encrypt(
      Nonce::from_slice(nonce.as_bytes()),
      Payload { msg: plaintext, aad: associated_data.as_bytes() },
    )
    .unwrap();
  STANDARD.encode(sealed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::wechat::mock;

  const API_V3_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

  fn platform() -> PlatformKey {
    PlatformKey::new(mock::test_key().to_public_key(), "SERIAL")
  }

  fn signed(body: &[u8], timestamp: i64) -> NotifyHeaders {
    let merchant = MerchantKey::new(mock::test_key().clone());
    let nonce = "5K8264ILTKCH16CQ2502SI8ZNMTM67VS";
    let message = notify_message(&timestamp.to_string(), nonce, body);
    let signature =
      merchant.sign(std::str::from_utf8(&message).unwrap()).unwrap();

    NotifyHeaders {
      timestamp: timestamp.to_string(),
      nonce: nonce.into(),
      signature,
      serial: "SERIAL".into(),
    }
  }

  #[test]
  fn test_verify_accepts_platform_signature() {
    let body = br#"{"id":"EV-1"}"#;
    let headers = signed(body, 1_700_000_000);

    platform().verify_at(&headers, body, 1_700_000_010).unwrap();
  }

  #[test]
  fn test_verify_rejects_tampered_body() {
    let headers = signed(br#"{"id":"EV-1"}"#, 1_700_000_000);

    let result =
      platform().verify_at(&headers, br#"{"id":"EV-2"}"#, 1_700_000_000);
    assert!(matches!(result, Err(Error::Notify(Notify::BadSignature))));
  }

  #[test]
  fn test_verify_rejects_stale_timestamp() {
    let body = b"{}";
    let headers = signed(body, 1_700_000_000);

    let result =
      platform().verify_at(&headers, body, 1_700_000_000 + MAX_CLOCK_SKEW + 1);
    assert!(matches!(result, Err(Error::Notify(Notify::Stale))));
  }

  #[test]
  fn test_verify_rejects_unknown_serial() {
    let body = b"{}";
    let mut headers = signed(body, 1_700_000_000);
    headers.serial = "OTHER".into();

    let result = platform().verify_at(&headers, body, 1_700_000_000);
    assert!(matches!(result, Err(Error::Notify(Notify::UnknownSerial(_)))));
  }

  #[test]
  fn test_verify_rejects_garbage_signature() {
    let body = b"{}";
    let mut headers = signed(body, 1_700_000_000);
    headers.signature = "not base64 at all!".into();

    let result = platform().verify_at(&headers, body, 1_700_000_000);
    assert!(matches!(result, Err(Error::Notify(Notify::BadSignature))));
  }

  #[test]
  fn test_decrypt_opens_sealed_resource() {
    let sealed =
      encrypt(API_V3_KEY, "0123456789ab", "transaction", b"{\"a\":1}");

    let plain =
      decrypt(API_V3_KEY, "0123456789ab", "transaction", &sealed).unwrap();
    assert_eq!(plain, b"{\"a\":1}");
  }

  #[test]
  fn test_decrypt_rejects_wrong_associated_data() {
    let sealed = encrypt(API_V3_KEY, "0123456789ab", "transaction", b"{}");

    let result = decrypt(API_V3_KEY, "0123456789ab", "mch_payment", &sealed);
    assert!(matches!(result, Err(Error::Decrypt(_))));
  }

  #[test]
  fn test_decrypt_rejects_bad_nonce_length() {
    let result = decrypt(API_V3_KEY, "short", "", "AAAA");
    assert!(matches!(result, Err(Error::Decrypt(_))));
  }

  #[test]
  fn test_authorization_header_shape() {
    let merchant = MerchantKey::new(mock::test_key().clone());
    let header = authorization(
      "1900000001",
      "MCH_SERIAL",
      &merchant,
      "POST",
      "/v3/pay/transactions/jsapi",
      "{}",
    )
    .unwrap();

    assert!(header.starts_with("WECHATPAY2-SHA256-RSA2048 mchid=\"1900000001\""));
    assert!(header.contains("serial_no=\"MCH_SERIAL\""));
  }
}
