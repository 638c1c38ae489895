use std::future::Future;

use tokio::{sync::Mutex, time::Instant};

use crate::prelude::*;

/// Tokens are refreshed this long before the issuer says they expire.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(300);

struct Cached {
  token: String,
  expires_at: Instant,
}

/// Single-flight cache for the mini-program access token.
///
/// The lock is held across the refresh so concurrent callers wait for one
/// fetch instead of racing to the issuer.
pub struct TokenCache {
  slot: Mutex<Option<Cached>>,
  buffer: Duration,
}

impl Default for TokenCache {
  fn default() -> Self {
    Self::new(EXPIRY_BUFFER)
  }
}

impl TokenCache {
  pub fn new(buffer: Duration) -> Self {
    Self { slot: Mutex::new(None), buffer }
  }

  /// Returns the cached token, or calls `fetch` for a new `(token, ttl)`.
  pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(String, Duration)>>,
  {
    let mut slot = self.slot.lock().await;

    if let Some(cached) = slot.as_ref()
      && cached.expires_at > Instant::now()
    {
      return Ok(cached.token.clone());
    }

    let (token, ttl) = fetch().await?;
    debug!("access token refreshed, valid for {}s", ttl.as_secs());

    *slot = Some(Cached {
      token: token.clone(),
      expires_at: Instant::now() + ttl.saturating_sub(self.buffer),
    });

    Ok(token)
  }

  pub async fn invalidate(&self) {
    *self.slot.lock().await = None;
  }
}
