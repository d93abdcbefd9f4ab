//! Shared key-value cache holding all mutable engine state.
//!
//! Sessions, federation handshakes and revoked access tokens live here. Every
//! operation is atomic on a single key; there are no multi-key transactions.
//!
//! # Backends
//!
//! - [`RedisCache`]: production backend. Compare-and-swap and take run as
//!   Lua scripts so they are atomic on the server.
//! - [`InMemoryCache`]: single-process backend for tests and local runs.
//!
//! # Failure handling
//!
//! Backends bound every call with a timeout and report [`CacheError`].
//! Callers go through [`with_retry`], which retries a transient failure once
//! after a short backoff and surfaces a second failure as
//! `SsoError::ServiceUnavailable`.

pub mod lua_scripts;
pub mod memory;
pub mod redis_cache;

pub use memory::InMemoryCache;
pub use redis_cache::RedisCache;

use crate::errors::SsoError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache operation timed out")]
    Timeout,

    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// Entry exists but cannot be decoded. Retrying will not help.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl CacheError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Timeout | CacheError::Unavailable(_))
    }
}

/// Result of [`KeyValueCache::compare_and_swap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored value matched `expected` (or already equals `new`) and
    /// now holds `new`.
    Swapped,
    /// The stored value is something else; nothing was written.
    Mismatch,
    /// No value is stored under the key.
    Missing,
}

/// Single-key atomic operations over string values with TTLs.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Store `value`, replacing any existing entry.
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Replace the value only if it currently equals `expected`.
    ///
    /// Idempotent: if the value already equals `new` the call reports
    /// `Swapped`, so retrying after a lost response is safe as long as `new`
    /// is unique.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_seconds: u64,
    ) -> Result<CasOutcome, CacheError>;

    /// Atomically read and delete. At most one concurrent caller gets `Some`.
    async fn take(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Delete the entry. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}

/// Run a cache operation, retrying once after `backoff` on a transient
/// failure.
pub async fn with_retry<T, F, Fut>(
    operation: &'static str,
    backoff: Duration,
    mut attempt: F,
) -> Result<T, SsoError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CacheError>>,
{
    match attempt().await {
        Ok(value) => Ok(value),
        Err(e) if e.is_transient() => {
            warn!(
                target: "sso.cache",
                operation,
                error = %e,
                "Transient cache failure, retrying once"
            );
            tokio::time::sleep(backoff).await;
            attempt().await.map_err(|e| to_sso_error(operation, e))
        }
        Err(e) => Err(to_sso_error(operation, e)),
    }
}

fn to_sso_error(operation: &'static str, err: CacheError) -> SsoError {
    match err {
        CacheError::Timeout | CacheError::Unavailable(_) => {
            warn!(target: "sso.cache", operation, error = %err, "Cache operation failed after retry");
            SsoError::ServiceUnavailable(format!("cache {operation} failed: {err}"))
        }
        CacheError::Corrupt(reason) => {
            SsoError::Internal(format!("cache {operation} returned corrupt data: {reason}"))
        }
    }
}
