use std::future::Future;

use rand::{Rng, distributions::Alphanumeric};

use crate::prelude::*;

pub const CENTS_PER_YUAN: i64 = 100;

/// Denominator for rates expressed in basis points.
pub const BPS: i64 = 10_000;

/// Converts a display amount to cents, rounding down to the cent.
pub fn to_cents(yuan: f64) -> i64 {
  // 0.29 * 100 is 28.999..., so settle the representation error first
  let scaled = (yuan * CENTS_PER_YUAN as f64 * 1_000.0).round() / 1_000.0;
  scaled.floor() as i64
}

/// Amount sent to the gateway: floored to the cent, never below one cent
/// for a non-zero charge.
pub fn payable_cents(yuan: f64) -> i64 {
  if yuan <= 0.0 { 0 } else { to_cents(yuan).max(1) }
}

pub fn to_yuan(cents: i64) -> f64 {
  cents as f64 / CENTS_PER_YUAN as f64
}

pub fn format_yuan(cents: i64) -> String {
  let sign = if cents < 0 { "-" } else { "" };
  let cents = cents.abs();
  format!(
    "{sign}{}.{:02}",
    cents / CENTS_PER_YUAN,
    cents % CENTS_PER_YUAN
  )
}

/// Applies a basis-point rate, rounding down.
pub fn apply_rate(amount: i64, bps: i64) -> i64 {
  amount * bps / BPS
}

/// `600` becomes `6%`, `1250` becomes `12.5%`.
pub fn format_bps(bps: i64) -> String {
  if bps % 100 == 0 {
    format!("{}%", bps / 100)
  } else {
    format!("{}%", bps as f64 / 100.0)
  }
}

pub fn format_date(date: DateTime) -> String {
  date.format("%Y-%m-%d %H:%M").to_string()
}

/// Random lowercase hex string of `len` characters.
pub fn random_hex(len: usize) -> String {
  let mut bytes = vec![0u8; len.div_ceil(2)];
  rand::thread_rng().fill(bytes.as_mut_slice());
  let mut hex = hex::encode(bytes);
  hex.truncate(len);
  hex
}

/// Limit for a store or gateway step when the caller sets none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs `fut` under `limit`, reporting expiry as [`Error::Timeout`].
pub async fn within<T>(
  limit: Duration,
  fut: impl Future<Output = Result<T>>,
) -> Result<T> {
  tokio::time::timeout(limit, fut).await.map_err(|_| Error::Timeout)?
}

pub fn random_code(len: usize) -> String {
  rand::thread_rng()
    .sample_iter(&Alphanumeric)
    .take(len)
    .map(|c| (c as char).to_ascii_uppercase())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_to_cents_floors() {
    assert_eq!(to_cents(12.349), 1234);
    assert_eq!(to_cents(0.29), 29);
    assert_eq!(to_cents(19.999), 1999);
    assert_eq!(to_cents(100.0), 10000);
  }

  #[test]
  fn test_payable_has_one_cent_minimum() {
    assert_eq!(payable_cents(0.001), 1);
    assert_eq!(payable_cents(0.0), 0);
    assert_eq!(payable_cents(49.5), 4950);
  }

  #[test]
  fn test_format_yuan() {
    assert_eq!(format_yuan(1234), "12.34");
    assert_eq!(format_yuan(5), "0.05");
    assert_eq!(format_yuan(-250), "-2.50");
  }

  #[test]
  fn test_apply_rate_rounds_down() {
    assert_eq!(apply_rate(1000, 600), 60);
    assert_eq!(apply_rate(5000, 1100), 550);
    assert_eq!(apply_rate(199, 500), 9);
  }

  #[test]
  fn test_format_bps() {
    assert_eq!(format_bps(600), "6%");
    assert_eq!(format_bps(1250), "12.5%");
  }

  #[test]
  fn test_random_hex() {
    let hex = random_hex(16);
    assert_eq!(hex.len(), 16);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
