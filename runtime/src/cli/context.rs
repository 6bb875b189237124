//! Wiring of runtime components for CLI commands.
//!
//! Read-only commands only need the registry and the store; refresh commands
//! additionally launch the acquirer (and browser) and the extractor.

use crate::acquisition::http_client::HttpClient;
use crate::acquisition::{AcquisitionSettings, PageAcquirer};
use crate::config::RuntimeConfig;
use crate::coordinator::{RefreshCoordinator, RefreshPolicy};
use crate::events::EventBus;
use crate::extraction::HttpExtractor;
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::renderer::chromium;
use crate::store::{MemoryStore, SnapshotStore, SqliteStore};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

/// `--db :memory:` selects the in-process store.
pub const MEMORY_DB: &str = ":memory:";

/// Room for a full `refresh-all` worth of events between reads.
const EVENT_BUFFER: usize = 4_096;

pub struct Runtime {
    pub config: RuntimeConfig,
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<dyn SnapshotStore>,
}

impl Runtime {
    pub fn load(config: RuntimeConfig) -> Result<Self> {
        let registry = ProviderRegistry::load(&config.providers_path).with_context(|| {
            format!(
                "cannot load providers from {} (set PRICEWATCH_PROVIDERS or pass --providers)",
                config.providers_path.display()
            )
        })?;
        let store = open_store(&config.db_path)?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
            store,
        })
    }

    pub fn provider(&self, id: &str) -> Result<&ProviderDescriptor> {
        match self.registry.get(id) {
            Some(p) => Ok(p),
            None => bail!(
                "unknown provider '{id}'. Known providers: {}",
                self.registry.ids().join(", ")
            ),
        }
    }

    /// Production page acquirer; launches Chromium when it can be found.
    pub async fn acquirer(&self) -> PageAcquirer {
        let renderer = chromium::launch_or_noop().await;
        PageAcquirer::new(
            HttpClient::new(self.config.http_timeout_ms),
            renderer,
            AcquisitionSettings {
                concurrency: self.config.page_concurrency,
                nav_timeout_ms: self.config.nav_timeout_ms,
                ..AcquisitionSettings::default()
            },
        )
    }

    /// Full refresh pipeline. Requires an extraction endpoint.
    pub async fn coordinator(&self) -> Result<Arc<RefreshCoordinator>> {
        let Some(endpoint) = self.config.extractor_url.clone() else {
            bail!("no extraction endpoint configured; set PRICEWATCH_EXTRACTOR_URL");
        };
        let extractor = HttpExtractor::new(
            endpoint,
            self.config.extractor_token.clone(),
            self.config.http_timeout_ms.saturating_mul(4),
        );
        let acquirer = self.acquirer().await;
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&self.registry),
            Arc::new(acquirer),
            Arc::new(extractor),
            Arc::clone(&self.store),
        )
        .with_policy(RefreshPolicy::from_config(&self.config))
        .with_events(Arc::new(EventBus::new(EVENT_BUFFER)));
        Ok(Arc::new(coordinator))
    }
}

pub fn open_store(path: &Path) -> Result<Arc<dyn SnapshotStore>> {
    if path.as_os_str() == MEMORY_DB {
        tracing::warn!("using in-memory store; nothing will persist");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    tracing::debug!(path = %path.display(), "snapshot store opened");
    Ok(Arc::new(store))
}
