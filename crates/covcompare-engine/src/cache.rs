//! Cross-request cache for comparison hints.
//!
//! Values are JSON documents with an expiry. The engine treats every cache
//! failure as a miss; see [`crate::pull`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use covcompare_core::CompareError;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

/// Key/value store shared between requests.
pub trait CrossRequestCache: Send + Sync {
    /// The live value under `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<Value>, CompareError>;

    /// Replace the value under `key`, expiring after `ttl`.
    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CompareError>;
}

impl<T: CrossRequestCache + ?Sized> CrossRequestCache for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Value>, CompareError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CompareError> {
        (**self).set(key, value, ttl)
    }
}

fn expiry(ttl: Duration) -> Result<DateTime<Utc>, CompareError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| CompareError::Cache(format!("invalid ttl: {e}")))?;
    Ok(Utc::now() + ttl)
}

/// In-process cache, mostly for tests and one-shot runs.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use covcompare_engine::cache::{CrossRequestCache, MemoryCache};
///
/// let cache = MemoryCache::new();
/// cache.set("k", &serde_json::json!(["a.rs"]), Duration::from_secs(60)).unwrap();
/// assert_eq!(cache.get("k").unwrap(), Some(serde_json::json!(["a.rs"])));
/// assert_eq!(cache.get("missing").unwrap(), None);
/// ```
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Value, DateTime<Utc>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CrossRequestCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CompareError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CompareError::Cache("cache lock poisoned".into()))?;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Utc::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CompareError> {
        let expires_at = expiry(ttl)?;
        self.entries
            .lock()
            .map_err(|_| CompareError::Cache("cache lock poisoned".into()))?
            .insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }
}

/// SQLite-backed cache that survives between runs.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use covcompare_engine::cache::{CrossRequestCache, SqliteCache};
///
/// let cache = SqliteCache::in_memory().unwrap();
/// cache.set("k", &serde_json::json!({"n": 1}), Duration::from_secs(60)).unwrap();
/// assert_eq!(cache.get("k").unwrap(), Some(serde_json::json!({"n": 1})));
/// ```
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open or create a cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CompareError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CompareError::Cache(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CompareError::Cache(format!("failed to open cache database: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, CompareError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CompareError::Cache(format!("failed to create in-memory cache: {e}"))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, CompareError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| CompareError::Cache(format!("failed to create cache schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CompareError> {
        self.conn
            .lock()
            .map_err(|_| CompareError::Cache("cache lock poisoned".into()))
    }
}

impl CrossRequestCache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CompareError> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| CompareError::Cache(format!("failed to read cache entry: {e}")))?;

        let Some((value, expires_at)) = row else {
            return Ok(None);
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| CompareError::Cache(format!("invalid expiry for {key}: {e}")))?;
        if expires_at <= Utc::now() {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
                .map_err(|e| CompareError::Cache(format!("failed to evict cache entry: {e}")))?;
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&value)?))
    }

    fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CompareError> {
        let expires_at = expiry(ttl)?.to_rfc3339();
        let value = serde_json::to_string(value)?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )
            .map_err(|e| CompareError::Cache(format!("failed to write cache entry: {e}")))?;
        Ok(())
    }
}
