//! Timestamped key/value cache with TTL-on-read.
//!
//! Entries are stored as JSON text `{"data": <payload>, "timestamp": <epoch millis>}` so that
//! both backends (in-memory and SQLite) share one encoding, and so that a corrupted or foreign
//! value can be detected and treated as a miss.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Cache key of the news digest
pub const NEWS_CACHE_KEY: &str = "wallnews_news";
/// Cache key of the social digest
pub const SOCIAL_CACHE_KEY: &str = "wallnews_social";

/// One hour, in milliseconds
pub const DEFAULT_TTL_MS: i64 = 60 * 60 * 1000;

/// Raw storage underneath the cache. Backends never interpret values.
#[async_trait::async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: String) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Serialized form of an entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn stored_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
    }
}

#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KeyValueBackend>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            ttl: Duration::milliseconds(DEFAULT_TTL_MS),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Utc::now()).await
    }

    /// Returns the payload stored under `key` if it was written less than one TTL before `now`.
    /// Missing, expired, malformed and unreadable entries are all reported as absent.
    pub async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let raw = match self.backend.read(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, backend = self.backend.name(), "cache read failed: {:#}", e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, "ignoring malformed cache entry: {}", e);
                return None;
            }
        };

        let age_ms = now.timestamp_millis() - entry.timestamp;
        if age_ms < self.ttl.num_milliseconds() {
            debug!(key, age_ms, "cache hit");
            Some(entry.data)
        } else {
            debug!(key, age_ms, "cache entry expired");
            None
        }
    }

    /// Typed read; a payload that no longer fits `T` counts as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key, "cached payload has unexpected shape: {}", e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, payload: Value) -> Result<()> {
        self.set_at(key, payload, Utc::now()).await
    }

    pub async fn set_at(&self, key: &str, payload: Value, now: DateTime<Utc>) -> Result<()> {
        let entry = CacheEntry {
            data: payload,
            timestamp: now.timestamp_millis(),
        };
        let raw = serde_json::to_string(&entry).context("failed to encode cache entry")?;
        self.backend
            .write(key, raw)
            .await
            .with_context(|| format!("failed to write cache entry '{}'", key))
    }
}

/// Process-local backend
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// SQLite-backed store so cached digests survive a restart
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Wraps the pool and makes sure the cache table exists.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

/// Idempotent; safe to call at every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .execute(pool)
    .await
    .context("failed to ensure cache schema")?;
    Ok(())
}

#[async_trait::async_trait]
impl KeyValueBackend for SqliteBackend {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query cache entry")
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, updated_at)
            VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("failed to upsert cache entry")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    #[tokio::test]
    async fn entry_valid_until_ttl_boundary() {
        let cache = CacheStore::in_memory();
        let t = 1_700_000_000_000;
        cache.set_at("k", json!({"a": 1}), at(t)).await.unwrap();

        assert_eq!(cache.get_at("k", at(t)).await, Some(json!({"a": 1})));
        assert_eq!(
            cache.get_at("k", at(t + DEFAULT_TTL_MS - 1)).await,
            Some(json!({"a": 1}))
        );
        assert_eq!(cache.get_at("k", at(t + DEFAULT_TTL_MS)).await, None);
        assert_eq!(cache.get_at("k", at(t + DEFAULT_TTL_MS + 5_000)).await, None);
    }

    #[tokio::test]
    async fn missing_key_is_absent() {
        let cache = CacheStore::in_memory();
        assert!(cache.get("nothing").await.is_none());
    }

    #[tokio::test]
    async fn set_overwrites_and_refreshes_timestamp() {
        let cache = CacheStore::in_memory();
        let t = 1_700_000_000_000;
        cache.set_at("k", json!([1]), at(t)).await.unwrap();
        cache
            .set_at("k", json!([2]), at(t + DEFAULT_TTL_MS - 10))
            .await
            .unwrap();

        assert_eq!(
            cache.get_at("k", at(t + DEFAULT_TTL_MS + 10)).await,
            Some(json!([2]))
        );
    }

    #[tokio::test]
    async fn malformed_entries_are_absent() {
        let backend = Arc::new(MemoryBackend::default());
        backend.write("broken", "not json".into()).await.unwrap();
        backend
            .write("wrong_shape", r#"{"payload": 1}"#.into())
            .await
            .unwrap();
        let cache = CacheStore::new(backend);

        assert!(cache.get("broken").await.is_none());
        assert!(cache.get("wrong_shape").await.is_none());
    }

    #[tokio::test]
    async fn repeated_reads_are_identical() {
        let cache = CacheStore::in_memory();
        cache
            .set(NEWS_CACHE_KEY, json!({"articles": [{"title": "x"}]}))
            .await
            .unwrap();

        let first = cache.get(NEWS_CACHE_KEY).await;
        let second = cache.get(NEWS_CACHE_KEY).await;
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn stored_encoding_uses_data_and_timestamp() {
        let backend = Arc::new(MemoryBackend::default());
        let cache = CacheStore::new(backend.clone());
        cache
            .set_at(SOCIAL_CACHE_KEY, json!(["t"]), at(42))
            .await
            .unwrap();

        let raw = backend.read(SOCIAL_CACHE_KEY).await.unwrap().unwrap();
        let decoded: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded, json!({"data": ["t"], "timestamp": 42}));
    }

    #[tokio::test]
    async fn typed_read_rejects_wrong_shape() {
        let cache = CacheStore::in_memory();
        cache.set("k", json!({"not": "a list"})).await.unwrap();
        assert!(cache.get_as::<Vec<String>>("k").await.is_none());

        cache.set("k", json!(["a", "b"])).await.unwrap();
        assert_eq!(
            cache.get_as::<Vec<String>>("k").await,
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }
}
