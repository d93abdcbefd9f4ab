//! Revocation list for access tokens.
//!
//! Key pattern: `revoked:{jti}`, TTL = remaining token lifetime plus the
//! codec's clock skew leeway, so an entry outlives every moment at which
//! the token still verifies.

use crate::cache::{with_retry, KeyValueCache};
use crate::errors::SsoError;
use crate::repositories::sessions::ttl_to_u64;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Clone)]
pub struct RevocationList {
    cache: Arc<dyn KeyValueCache>,
    retry_backoff: Duration,
    leeway_seconds: i64,
}

fn revocation_key(jti: &str) -> String {
    format!("revoked:{jti}")
}

impl RevocationList {
    pub fn new(cache: Arc<dyn KeyValueCache>, retry_backoff: Duration) -> Self {
        Self {
            cache,
            retry_backoff,
            leeway_seconds: 0,
        }
    }

    /// Keep entries this many seconds past `exp`. Must match the codec's
    /// clock skew.
    pub fn with_leeway(mut self, seconds: i64) -> Self {
        self.leeway_seconds = seconds.max(0);
        self
    }

    /// Revoke a token until `expires_at` plus the leeway. Tokens past that
    /// point no longer verify and are skipped.
    #[instrument(skip_all, name = "sso.revocation.revoke")]
    pub async fn revoke(&self, jti: &str, expires_at: i64) -> Result<(), SsoError> {
        let remaining =
            expires_at.saturating_add(self.leeway_seconds) - chrono::Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }

        let key = revocation_key(jti);
        let ttl = ttl_to_u64(remaining);
        let cache = &self.cache;

        with_retry("put", self.retry_backoff, || cache.put(&key, "1", ttl)).await
    }

    #[instrument(skip_all, name = "sso.revocation.check")]
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, SsoError> {
        let key = revocation_key(jti);
        let cache = &self.cache;

        Ok(with_retry("get", self.retry_backoff, || cache.get(&key))
            .await?
            .is_some())
    }
}
