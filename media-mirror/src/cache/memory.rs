// In-process cache backend. Entries live until they are replaced, deleted,
// purged by the retention sweep or evicted once `max_capacity` is reached.
use super::{CacheEntry, CacheError, CacheStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache;

pub struct MemoryStore {
    cache: Cache<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();
        MemoryStore { cache }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.cache.get(key))
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        // The upsert runs under moka's per-key lock, so readers see either the
        // old entry or the new one.
        self.cache
            .entry(entry.key.clone())
            .and_upsert_with(|existing| {
                let created_at = existing
                    .map(|e| e.into_value().created_at)
                    .unwrap_or(entry.created_at);
                CacheEntry {
                    created_at,
                    ..entry.clone()
                }
            });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
        Ok(())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CacheError> {
        let expired: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.cache.invalidate(key.as_str());
        }
        self.cache.run_pending_tasks();

        Ok(expired.len() as u64)
    }
}
