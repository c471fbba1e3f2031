use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Per-adapter settings keyed by registry name
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Upper bound on pooled connections; the throttle sits in front of it
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Throttle permits guarding the store
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Pause between titles while crawling
    #[serde(default = "default_title_delay")]
    pub title_delay_ms: u64,

    /// Pause between catalog pages while crawling
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Pause between titles during a full-catalog sync
    #[serde(default = "default_sync_delay")]
    pub sync_delay_ms: u64,

    /// Chapters reconciled per batch
    #[serde(default = "default_batch_size")]
    pub chapter_batch_size: usize,

    /// Pause between chapter batches
    #[serde(default = "default_batch_delay")]
    pub chapter_batch_delay_ms: u64,

    /// Timeout for the title + genre transaction
    #[serde(default = "default_title_tx_timeout")]
    pub title_tx_timeout_secs: u64,

    /// Timeout for each request to a source
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    pub base_url: Option<String>,
    pub per_page: Option<u32>,
    #[serde(default)]
    pub requires_auth: bool,
}

fn default_sqlite_path() -> String { "manga_sync.db".to_string() }
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 5432 }
fn default_dbname() -> String { "manga_catalog".to_string() }
fn default_user() -> String { "manga_admin".to_string() }
fn default_pool_size() -> usize { 5 }
fn default_max_concurrent() -> usize { crate::throttle::DEFAULT_MAX_CONCURRENT }
fn default_title_delay() -> u64 { 1000 }
fn default_page_delay() -> u64 { 3000 }
fn default_sync_delay() -> u64 { 1000 }
fn default_batch_size() -> usize { 3 }
fn default_batch_delay() -> u64 { 200 }
fn default_title_tx_timeout() -> u64 { 30 }
fn default_http_timeout() -> u64 { 30 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            sqlite_path: default_sqlite_path(),
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: String::new(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            title_delay_ms: default_title_delay(),
            page_delay_ms: default_page_delay(),
            sync_delay_ms: default_sync_delay(),
            chapter_batch_size: default_batch_size(),
            chapter_batch_delay_ms: default_batch_delay(),
            title_tx_timeout_secs: default_title_tx_timeout(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl SyncConfig {
    pub fn title_delay(&self) -> Duration {
        Duration::from_millis(self.title_delay_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    pub fn chapter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.chapter_batch_delay_ms)
    }

    pub fn title_tx_timeout(&self) -> Duration {
        Duration::from_secs(self.title_tx_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// No delays at all; used by tests and one-off runs against local stubs.
    pub fn without_delays() -> Self {
        Self {
            title_delay_ms: 0,
            page_delay_ms: 0,
            sync_delay_ms: 0,
            chapter_batch_delay_ms: 0,
            ..Self::default()
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, or defaults when absent.
    pub fn load() -> SyncResult<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&content).map_err(|e| match e {
            SyncError::Config(msg) => SyncError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn parse(content: &str) -> SyncResult<Self> {
        toml::from_str::<Config>(content).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn source(&self, name: &str) -> SourceConfig {
        self.sources.get(name).cloned().unwrap_or_default()
    }
}
