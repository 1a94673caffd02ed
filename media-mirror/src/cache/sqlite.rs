//! SQLite-backed cache storage.

use super::{CacheEntry, CacheError, CacheStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

const BACKEND: &str = "sqlite";

/// Schema for the cache table. Timestamps are unix milliseconds.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS api_cache (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_cache_created_at ON api_cache(created_at);
"#;

/// Single-statement upsert: a reader sees the old row or the new one.
const UPSERT: &str = "INSERT INTO api_cache (key, value, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(key) DO UPDATE SET
         value = excluded.value,
         updated_at = excluded.updated_at";

/// Cache storage persisted in a SQLite table.
///
/// rusqlite is blocking, so every operation runs on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::storage(BACKEND, format!("failed to create cache directory: {e}"))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            CacheError::storage(
                BACKEND,
                format!("failed to open cache database at {}: {e}", path.display()),
            )
        })?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(|e| CacheError::storage(BACKEND, e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(CACHE_SCHEMA)
            .map_err(|e| CacheError::storage(BACKEND, format!("failed to run migrations: {e}")))?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| CacheError::storage(BACKEND, format!("lock poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, CacheError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CacheError::storage(BACKEND, format!("invalid timestamp {millis}")))
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64, i64)> = conn
                .query_row(
                    "SELECT value, created_at, updated_at FROM api_cache WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| CacheError::storage(BACKEND, e))?;

            let Some((value, created_at, updated_at)) = row else {
                return Ok(None);
            };

            Ok(Some(CacheEntry {
                key,
                value: Arc::new(serde_json::from_str(&value)?),
                created_at: from_millis(created_at)?,
                updated_at: from_millis(updated_at)?,
            }))
        })
        .await
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = entry.key.clone();
        let value = serde_json::to_string(entry.value.as_ref())?;
        let created_at = entry.created_at.timestamp_millis();
        let updated_at = entry.updated_at.timestamp_millis();

        self.with_conn(move |conn| {
            conn.execute(UPSERT, params![key, value, created_at, updated_at])
                .map_err(|e| CacheError::storage(BACKEND, e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM api_cache WHERE key = ?1", params![key])
                .map_err(|e| CacheError::storage(BACKEND, e))?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM api_cache", [])
                .map_err(|e| CacheError::storage(BACKEND, e))?;
            Ok(())
        })
        .await
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CacheError> {
        let cutoff = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            let purged = conn
                .execute("DELETE FROM api_cache WHERE created_at < ?1", params![cutoff])
                .map_err(|e| CacheError::storage(BACKEND, e))?;
            Ok(purged as u64)
        })
        .await
    }
}
