//! Session records in the shared cache.
//!
//! Key pattern: `session:{session_id}`, TTL = session lifetime.
//!
//! Rotation is a compare-and-swap of the whole serialized record. The record
//! embeds `current_refresh_jti`, which is unique per rotation, so equality
//! of the serialized value is equality of the current refresh token.

use crate::cache::{with_retry, CasOutcome, KeyValueCache};
use crate::errors::SsoError;
use crate::models::Session;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

/// A session as read from the cache, with the exact stored bytes needed for
/// a later compare-and-swap.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub session: Session,
    raw: String,
}

#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn KeyValueCache>,
    retry_backoff: Duration,
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

pub(crate) fn ttl_to_u64(ttl_seconds: i64) -> u64 {
    u64::try_from(ttl_seconds.max(1)).unwrap_or(1)
}

fn encode(session: &Session) -> Result<String, SsoError> {
    serde_json::to_string(session)
        .map_err(|e| SsoError::Internal(format!("session serialization failed: {e}")))
}

impl SessionStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, retry_backoff: Duration) -> Self {
        Self {
            cache,
            retry_backoff,
        }
    }

    #[instrument(skip_all, name = "sso.session.create")]
    pub async fn create(&self, session: &Session, ttl_seconds: i64) -> Result<(), SsoError> {
        let key = session_key(&session.session_id);
        let value = encode(session)?;
        let ttl = ttl_to_u64(ttl_seconds);
        let cache = &self.cache;

        with_retry("put", self.retry_backoff, || cache.put(&key, &value, ttl)).await
    }

    /// Load a session. Unreadable records are treated as absent.
    #[instrument(skip_all, name = "sso.session.get")]
    pub async fn get(&self, session_id: &str) -> Result<Option<StoredSession>, SsoError> {
        let key = session_key(session_id);
        let cache = &self.cache;

        let Some(raw) = with_retry("get", self.retry_backoff, || cache.get(&key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(StoredSession { session, raw })),
            Err(e) => {
                warn!(target: "sso.session", error = %e, "Discarding unreadable session record");
                Ok(None)
            }
        }
    }

    /// Replace `current` with `next` if nobody rotated it in between.
    #[instrument(skip_all, name = "sso.session.rotate")]
    pub async fn rotate(
        &self,
        current: &StoredSession,
        next: &Session,
        ttl_seconds: i64,
    ) -> Result<CasOutcome, SsoError> {
        let key = session_key(&next.session_id);
        let value = encode(next)?;
        let ttl = ttl_to_u64(ttl_seconds);
        let cache = &self.cache;
        let expected = current.raw.as_str();

        with_retry("compare_and_swap", self.retry_backoff, || {
            cache.compare_and_swap(&key, expected, &value, ttl)
        })
        .await
    }

    /// Delete the session. Returns whether it existed.
    #[instrument(skip_all, name = "sso.session.destroy")]
    pub async fn destroy(&self, session_id: &str) -> Result<bool, SsoError> {
        let key = session_key(session_id);
        let cache = &self.cache;

        with_retry("delete", self.retry_backoff, || cache.delete(&key)).await
    }
}
