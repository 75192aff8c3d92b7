/*!
common/src/lib.rs

Shared configuration types and DB helper functions for WallNews.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default file with an override file
- A helper to open the SQLite pool backing the persistent cache
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// HTTP listener settings for the dashboard API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// News source (newsapi.org-compatible) settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewsConfig {
    /// Base URL, e.g. "https://newsapi.org/v2/" or a credential-holding proxy
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Generative text service (Messages API) settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub anthropic_version: Option<String>,
}

/// Cache settings. `backend` is "memory" (default) or "sqlite".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: Option<String>,
    pub ttl_seconds: Option<u64>,
}

/// Database configuration section (only used by the sqlite cache backend)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/wallnews.db")
    pub path: String,
}

/// Dashboard behaviour knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Language the translate operation targets (defaults to French)
    pub translation_language: Option<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and opens the database in WAL mode. The pool is
/// kept small; the only tenant is the cache table.
///
/// Example:
///   let pool = init_db_pool("data/wallnews.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_string() {
        let toml = r#"
            [news]
            base_url = "https://newsapi.org/v2/"
            api_key_env = "NEWS_API_KEY"

            [llm]
            model = "claude-3-5-haiku-latest"

            [cache]
            backend = "sqlite"

            [database]
            path = "data/test.db"
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.news.api_key_env.as_deref(), Some("NEWS_API_KEY"));
        assert_eq!(cfg.llm.model.as_deref(), Some("claude-3-5-haiku-latest"));
        assert_eq!(cfg.cache.backend.as_deref(), Some("sqlite"));
        assert_eq!(cfg.database.unwrap().path, "data/test.db");
        assert!(cfg.server.port.is_none());
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        std::fs::write(
            &default_path,
            "[llm]\nmodel = \"base-model\"\ntimeout_seconds = 30\n\n[server]\nport = 8000\n",
        )
        .unwrap();
        std::fs::write(&override_path, "[llm]\nmodel = \"override-model\"\n").unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");

        assert_eq!(cfg.llm.model.as_deref(), Some("override-model"));
        assert_eq!(cfg.llm.timeout_seconds, Some(30));
        assert_eq!(cfg.server.port, Some(8000));
    }

    #[tokio::test]
    async fn missing_files_yield_empty_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let cfg = Config::load_with_defaults(Some(&missing), None)
            .await
            .expect("load config");
        assert!(cfg.database.is_none());
        assert!(cfg.news.base_url.is_none());
    }

    #[tokio::test]
    async fn db_pool_creates_parent_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("wallnews.db");
        let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
        assert!(db_path.exists());
    }
}
