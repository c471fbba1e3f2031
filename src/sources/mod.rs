//! Source adapters and the name -> adapter registry.
//!
//! An adapter talks to one provider and hands back canonical values; the
//! orchestrator only ever sees [`SourceAdapter`] and never branches on which
//! provider it is driving.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::http_client::{HttpClientConfig, SourceClient};
use crate::metrics::MetricsTracker;
use crate::models::{CanonicalTitle, CatalogPage, ChapterPage};

pub mod json_api;
pub mod mangadex;

pub use json_api::JsonApiSource;
pub use mangadex::MangaDexSource;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry name, also used as `source_name` on every canonical title.
    fn name(&self) -> &str;

    /// One page of the provider catalog. Pages are 1-based.
    async fn fetch_catalog_page(&self, page: u32) -> SyncResult<CatalogPage>;

    async fn fetch_title_detail(&self, provider_id: &str) -> SyncResult<CanonicalTitle>;

    /// One page of a title's chapters, pages included, in provider order.
    async fn fetch_chapter_list(&self, provider_title_id: &str, page: u32) -> SyncResult<ChapterPage>;
}

/// Everything the built-in adapters need to construct themselves.
#[derive(Clone)]
pub struct BuiltinSettings {
    pub config: Config,
    /// Bearer tokens keyed by source name
    pub auth_tokens: HashMap<String, String>,
    pub metrics: Arc<MetricsTracker>,
}

impl BuiltinSettings {
    pub fn new(metrics: Arc<MetricsTracker>) -> Self {
        Self::from_config(Config::default(), metrics)
    }

    /// Per-source `[sources.*]` tables and the `[sync]` HTTP timeout.
    pub fn from_config(config: Config, metrics: Arc<MetricsTracker>) -> Self {
        Self {
            config,
            auth_tokens: HashMap::new(),
            metrics,
        }
    }

    fn client_for(&self, name: &str) -> SyncResult<SourceClient> {
        let source = self.config.source(name);
        let auth_token = self.auth_tokens.get(name).cloned();
        if source.requires_auth && auth_token.is_none() {
            log::warn!("[{}] requires auth but no token was provided; requests will be rejected", name);
        }
        SourceClient::new(
            name,
            HttpClientConfig {
                timeout: self.config.sync.http_timeout(),
                auth_token,
            },
            self.metrics.clone(),
        )
    }
}

/// Name -> adapter table. Built-in adapters are registered on the first
/// `get` or `list_names`; anything registered before that under the same
/// name wins over the built-in.
pub struct SourceRegistry {
    adapters: RwLock<BTreeMap<String, Arc<dyn SourceAdapter>>>,
    builtins: Option<BuiltinSettings>,
    initialized: OnceLock<()>,
}

impl SourceRegistry {
    /// Registry without built-ins; callers register everything themselves.
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(BTreeMap::new()),
            builtins: None,
            initialized: OnceLock::new(),
        }
    }

    pub fn with_builtins(settings: BuiltinSettings) -> Self {
        Self {
            builtins: Some(settings),
            ..Self::new()
        }
    }

    pub fn register(&self, adapter: Arc<dyn SourceAdapter>) {
        let name = adapter.name().to_string();
        log::debug!("Registering source adapter '{}'", name);
        self.write().insert(name, adapter);
    }

    pub fn get(&self, name: &str) -> SyncResult<Arc<dyn SourceAdapter>> {
        self.ensure_builtins();
        let adapters = self.read();
        adapters
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::RegistryMiss {
                name: name.to_string(),
                available: adapters.keys().cloned().collect(),
            })
    }

    /// Sorted names of every registered adapter.
    pub fn list_names(&self) -> Vec<String> {
        self.ensure_builtins();
        self.read().keys().cloned().collect()
    }

    fn ensure_builtins(&self) {
        self.initialized.get_or_init(|| {
            let Some(settings) = &self.builtins else {
                return;
            };
            let mut adapters = self.write();
            for (name, built) in build_builtins(settings) {
                match built {
                    Ok(adapter) => {
                        adapters.entry(name.to_string()).or_insert(adapter);
                    }
                    Err(e) => log::error!("Built-in source '{}' unavailable: {}", name, e),
                }
            }
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<dyn SourceAdapter>>> {
        self.adapters.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn SourceAdapter>>> {
        self.adapters.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_builtins(
    settings: &BuiltinSettings,
) -> Vec<(&'static str, SyncResult<Arc<dyn SourceAdapter>>)> {
    let json_api = settings.client_for(json_api::NAME).map(|client| {
        let cfg = settings.config.source(json_api::NAME);
        Arc::new(JsonApiSource::new(
            client,
            cfg.base_url.as_deref().unwrap_or(json_api::DEFAULT_BASE_URL),
            cfg.per_page.unwrap_or(json_api::DEFAULT_PER_PAGE),
        )) as Arc<dyn SourceAdapter>
    });

    let mangadex = settings.client_for(mangadex::NAME).map(|client| {
        let cfg = settings.config.source(mangadex::NAME);
        Arc::new(MangaDexSource::new(
            client,
            cfg.base_url.as_deref().unwrap_or(mangadex::BASE_URL),
            cfg.per_page.unwrap_or(mangadex::MAX_LIMIT),
        )) as Arc<dyn SourceAdapter>
    });

    vec![(json_api::NAME, json_api), (mangadex::NAME, mangadex)]
}
