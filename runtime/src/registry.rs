//! Provider registry — the static set of tracked pricing sources.
//!
//! Built once at startup from a JSON providers file and shared by `Arc`.
//! Adding a provider means editing the file and restarting; nothing mutates
//! the registry at runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Broad grouping of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCategory {
    Hosting,
    Api,
    Cloud,
    Database,
    Auth,
}

/// How page content should be acquired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Server-rendered content: plain fetch only, never launch the browser.
    Static,
    /// Plain fetch first, browser when the fetched content is insufficient.
    #[default]
    Auto,
    /// Client-rendered content: go straight to the browser.
    Browser,
}

/// Rendering hints for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderHint {
    pub mode: AcquisitionMode,
    /// CSS selectors signalling that pricing content has rendered.
    pub wait_for: Vec<String>,
    /// Extra settle time after scrolling, in milliseconds.
    pub settle_ms: u64,
}

/// Static configuration of one tracked provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub category: ProviderCategory,
    pub urls: Vec<String>,
    #[serde(default)]
    pub render: RenderHint,
    /// Keywords the evaluator expects to see (e.g. tier names). Misses only warn.
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    /// Last-resort document served when no snapshot exists at all.
    #[serde(default)]
    pub default_data: Option<Value>,
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("failed to read providers file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid providers file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("provider id must not be empty")]
    EmptyId,

    #[error("duplicate provider id: {0}")]
    DuplicateId(String),

    #[error("provider {0} has no urls")]
    NoUrls(String),

    #[error("provider {provider} has invalid url {url}: {reason}")]
    InvalidUrl {
        provider: String,
        url: String,
        reason: String,
    },
}

/// Immutable, validated set of providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDescriptor>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    /// Validate and index a provider list.
    pub fn new(providers: Vec<ProviderDescriptor>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(providers.len());
        for (i, p) in providers.iter().enumerate() {
            if p.id.trim().is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if p.urls.is_empty() {
                return Err(RegistryError::NoUrls(p.id.clone()));
            }
            for raw in &p.urls {
                let parsed = url::Url::parse(raw).map_err(|e| RegistryError::InvalidUrl {
                    provider: p.id.clone(),
                    url: raw.clone(),
                    reason: e.to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(RegistryError::InvalidUrl {
                        provider: p.id.clone(),
                        url: raw.clone(),
                        reason: format!("unsupported scheme {}", parsed.scheme()),
                    });
                }
            }
            if index.insert(p.id.clone(), i).is_some() {
                return Err(RegistryError::DuplicateId(p.id.clone()));
            }
        }
        Ok(Self { providers, index })
    }

    /// Parse a JSON array of provider descriptors.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let providers: Vec<ProviderDescriptor> = serde_json::from_str(json)?;
        Self::new(providers)
    }

    /// Load a providers file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let data = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json(&data)?;
        tracing::info!(
            providers = registry.len(),
            path = %path.display(),
            "provider registry loaded"
        );
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.index.get(id).map(|&i| &self.providers[i])
    }

    /// Providers in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
