//! Redis cache backend.
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so each operation clones it instead of locking.
//!
//! Every command is bounded by the configured timeout; a timeout is reported
//! as `CacheError::Timeout` and left to the caller's retry policy.

use crate::cache::{lua_scripts, CacheError, CasOutcome, KeyValueCache};
use crate::observability::metrics::record_cache_operation;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    timeout: Duration,
    cas_script: Script,
    take_script: Script,
}

impl RedisCache {
    /// Open a multiplexed connection.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unavailable` if the URL is invalid or the server
    /// cannot be reached within `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| {
            // The URL may embed credentials, so it is never logged.
            error!(target: "sso.cache.redis", error = %e, "Failed to open Redis client");
            CacheError::Unavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(|e| {
                error!(target: "sso.cache.redis", error = %e, "Failed to connect to Redis");
                CacheError::Unavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            timeout,
            cas_script: Script::new(lua_scripts::COMPARE_AND_SWAP),
            take_script: Script::new(lua_scripts::TAKE),
        })
    }

    async fn run<T, Fut>(&self, operation: &'static str, command: Fut) -> Result<T, CacheError>
    where
        Fut: Future<Output = RedisResult<T>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(CacheError::Timeout),
        };

        let status = match &result {
            Ok(_) => "success",
            Err(CacheError::Timeout) => "timeout",
            Err(_) => "error",
        };
        record_cache_operation(operation, status, start.elapsed());

        if let Err(e) = &result {
            warn!(target: "sso.cache.redis", operation, error = %e, "Redis operation failed");
        }
        result
    }
}

fn classify(err: RedisError) -> CacheError {
    if err.kind() == redis::ErrorKind::TypeError {
        CacheError::Corrupt(err.to_string())
    } else {
        CacheError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    #[instrument(skip_all, name = "sso.cache.put")]
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        self.run::<(), _>("put", conn.set_ex(key, value, ttl_seconds))
            .await
    }

    #[instrument(skip_all, name = "sso.cache.get")]
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        self.run::<Option<String>, _>("get", conn.get(key)).await
    }

    #[instrument(skip_all, name = "sso.cache.compare_and_swap")]
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_seconds: u64,
    ) -> Result<CasOutcome, CacheError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.cas_script.key(key);
        invocation.arg(expected).arg(new).arg(ttl_seconds);

        let code = self
            .run::<i64, _>("compare_and_swap", invocation.invoke_async(&mut conn))
            .await?;

        match code {
            1 => Ok(CasOutcome::Swapped),
            0 => Ok(CasOutcome::Mismatch),
            -1 => Ok(CasOutcome::Missing),
            other => Err(CacheError::Corrupt(format!(
                "unexpected compare-and-swap result {other}"
            ))),
        }
    }

    #[instrument(skip_all, name = "sso.cache.take")]
    async fn take(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.take_script.prepare_invoke();
        invocation.key(key);

        self.run::<Option<String>, _>("take", invocation.invoke_async(&mut conn))
            .await
    }

    #[instrument(skip_all, name = "sso.cache.delete")]
    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let removed = self.run::<i64, _>("delete", conn.del(key)).await?;
        Ok(removed > 0)
    }
}
