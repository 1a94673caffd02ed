//! Key-value response cache with time-to-live freshness.
//!
//! Backends implement [`CacheStore`] and only persist entries. Freshness,
//! error degradation and the retention sweep live in [`Cache`], so a backend
//! can be swapped without touching callers.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::metrics_defs::{CACHE_CLEANUP_PURGED, CACHE_HIT, CACHE_MISS, CACHE_STORE_ERROR};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("[{backend}] storage error: {message}")]
    Storage {
        backend: &'static str,
        message: String,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CacheError {
    pub fn storage(backend: &'static str, message: impl ToString) -> Self {
        CacheError::Storage {
            backend,
            message: message.to_string(),
        }
    }
}

/// A stored value together with the timestamps used for freshness and retention.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Arc<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.updated_at
    }
}

/// Storage backend for cache entries.
///
/// Backends do not interpret TTLs. `set` is an upsert that replaces the value
/// and `updated_at` in one step and keeps the original `created_at`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// A name for metrics and logs.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Removes every entry created before `cutoff`, returning how many went.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CacheError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Cache façade used by request handling.
///
/// Storage failures never reach the caller: reads degrade to misses and
/// writes to no-ops, both logged and counted.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Cache { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns the entry for `key` if it was written no longer than `ttl` ago.
    /// A stale entry is deleted and reported as a miss.
    pub async fn get(&self, key: &str, ttl: Duration) -> Option<CacheEntry> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                counter!(CACHE_MISS).increment(1);
                return None;
            }
            Err(e) => {
                self.record_error("get", key, &e);
                counter!(CACHE_MISS).increment(1);
                return None;
            }
        };

        if entry.age(self.now()) > to_delta(ttl) {
            tracing::debug!(key, "cache entry is stale, removing");
            self.delete(key).await;
            counter!(CACHE_MISS).increment(1);
            return None;
        }

        counter!(CACHE_HIT).increment(1);
        Some(entry)
    }

    /// Upserts `value` under `key` and returns the entry as written.
    ///
    /// The returned entry is valid for building a response even when the
    /// backend rejected the write.
    pub async fn set(&self, key: &str, value: Value) -> CacheEntry {
        let now = self.now();
        let entry = CacheEntry {
            key: key.to_string(),
            value: Arc::new(value),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.set(&entry).await {
            self.record_error("set", key, &e);
        }
        entry
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            self.record_error("delete", key, &e);
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = self.store.clear().await {
            self.record_error("clear", "*", &e);
        }
    }

    /// Purges entries created more than `retention` ago, regardless of TTL.
    pub async fn cleanup(&self, retention: Duration) -> u64 {
        // A retention reaching past chrono's range purges nothing.
        let cutoff = self
            .now()
            .checked_sub_signed(to_delta(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.store.purge_created_before(cutoff).await {
            Ok(purged) => {
                counter!(CACHE_CLEANUP_PURGED).increment(purged);
                tracing::info!(
                    backend = self.store.name(),
                    purged,
                    cutoff = %cutoff,
                    "cleaned up old cache entries"
                );
                purged
            }
            Err(e) => {
                self.record_error("cleanup", "*", &e);
                0
            }
        }
    }

    /// Runs [`Cache::cleanup`] every `interval` on a background task.
    /// The first sweep happens one interval after startup.
    pub fn spawn_cleanup(&self, interval: Duration, retention: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.cleanup(retention).await;
            }
        })
    }

    fn record_error(&self, op: &'static str, key: &str, error: &CacheError) {
        counter!(CACHE_STORE_ERROR, "op" => op).increment(1);
        tracing::warn!(
            backend = self.store.name(),
            op,
            key,
            error = %error,
            "cache operation failed, continuing without cache"
        );
    }
}
