//! In-process cache backend for tests and single-node local runs.
//!
//! Entries expire against `tokio::time::Instant`, so tests can drive expiry
//! with a paused clock. Reads skip expired entries; every
//! `PRUNE_INTERVAL`th write sweeps them out. Failures can be injected to
//! exercise the retry path.

use crate::cache::{CacheError, CasOutcome, KeyValueCache};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const PRUNE_INTERVAL: usize = 256;

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    injected_failures: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with `CacheError::Unavailable`.
    pub fn inject_failures(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_injected_failure(&self) -> Result<(), CacheError> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(CacheError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn insert(&self, entries: &mut HashMap<String, Entry>, key: &str, entry: Entry) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PRUNE_INTERVAL == 0 {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);
        }
        entries.insert(key.to_string(), entry);
    }
}

fn live_value<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a str> {
    entries
        .get(key)
        .filter(|entry| entry.expires_at > Instant::now())
        .map(|entry| entry.value.as_str())
}

fn entry(value: &str, ttl_seconds: u64) -> Entry {
    Entry {
        value: value.to_string(),
        expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.check_injected_failure()?;
        let mut entries = self.entries.lock().await;
        self.insert(&mut entries, key, entry(value, ttl_seconds));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_injected_failure()?;
        let entries = self.entries.lock().await;
        Ok(live_value(&entries, key).map(str::to_string))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_seconds: u64,
    ) -> Result<CasOutcome, CacheError> {
        self.check_injected_failure()?;
        let mut entries = self.entries.lock().await;

        let outcome = match live_value(&entries, key) {
            None => CasOutcome::Missing,
            Some(current) if current == new => return Ok(CasOutcome::Swapped),
            Some(current) if current != expected => CasOutcome::Mismatch,
            Some(_) => CasOutcome::Swapped,
        };

        if outcome == CasOutcome::Swapped {
            self.insert(&mut entries, key, entry(new, ttl_seconds));
        }
        Ok(outcome)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_injected_failure()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_injected_failure()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .remove(key)
            .is_some_and(|entry| entry.expires_at > now))
    }
}
