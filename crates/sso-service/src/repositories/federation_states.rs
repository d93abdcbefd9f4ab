//! Federation handshake records.
//!
//! Key pattern: `fedstate:{state}`, TTL = federation state lifetime.
//!
//! Redemption is an atomic take: the first caller gets the record and the
//! key is gone for everyone after it, whatever the outcome of the flow.

use crate::cache::{with_retry, KeyValueCache};
use crate::errors::SsoError;
use crate::models::FederationState;
use crate::repositories::sessions::ttl_to_u64;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct FederationStateStore {
    cache: Arc<dyn KeyValueCache>,
    retry_backoff: Duration,
}

fn state_key(state: &str) -> String {
    format!("fedstate:{state}")
}

impl FederationStateStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, retry_backoff: Duration) -> Self {
        Self {
            cache,
            retry_backoff,
        }
    }

    #[instrument(skip_all, name = "sso.fedstate.issue")]
    pub async fn issue(
        &self,
        state: &str,
        record: &FederationState,
        ttl_seconds: i64,
    ) -> Result<(), SsoError> {
        let key = state_key(state);
        let value = serde_json::to_string(record)
            .map_err(|e| SsoError::Internal(format!("state serialization failed: {e}")))?;
        let ttl = ttl_to_u64(ttl_seconds);
        let cache = &self.cache;

        with_retry("put", self.retry_backoff, || cache.put(&key, &value, ttl)).await
    }

    /// Consume the record. `None` if it never existed, expired, was already
    /// redeemed, or is unreadable.
    #[instrument(skip_all, name = "sso.fedstate.redeem")]
    pub async fn redeem(&self, state: &str) -> Result<Option<FederationState>, SsoError> {
        let key = state_key(state);
        let cache = &self.cache;

        let Some(raw) = with_retry("take", self.retry_backoff, || cache.take(&key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<FederationState>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(target: "sso.fedstate", error = %e, "Discarding unreadable federation state");
                Ok(None)
            }
        }
    }
}
