//! Runtime configuration resolved from environment variables.
//!
//! Every knob has a default; the environment only overrides. Command-line
//! flags in turn override the environment (see `main.rs`).

use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FRESHNESS_SECS: u64 = 3_600;
const DEFAULT_LEASE_SECS: u64 = 300;
const DEFAULT_ARCHIVE_RETENTION_DAYS: u32 = 365;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_NAV_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAINTENANCE_TICK_SECS: u64 = 300;
const DEFAULT_PAGE_CONCURRENCY: usize = 3;
const PROVIDERS_FILE: &str = "providers.json";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// SQLite database holding current, archive, failure, and lease tables.
    pub db_path: PathBuf,
    /// Providers file (JSON array of descriptors).
    pub providers_path: PathBuf,
    /// A current snapshot younger than this is served without refreshing.
    pub freshness_window: Duration,
    /// Lifetime of a refresh lease; an abandoned lease self-heals after this.
    pub lease_ttl: Duration,
    /// Archived snapshots older than this many days are purged by maintenance.
    pub archive_retention_days: u32,
    pub extractor_url: Option<String>,
    pub extractor_token: Option<String>,
    pub http_timeout_ms: u64,
    pub nav_timeout_ms: u64,
    /// Pages of one provider acquired at the same time.
    pub page_concurrency: usize,
    pub maintenance_tick: Duration,
    /// Scheduled refresh of every provider; `None` disables it.
    pub schedule_every: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("pricewatch.db"),
            providers_path: default_providers_path(
                &std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            ),
            freshness_window: Duration::from_secs(DEFAULT_FRESHNESS_SECS),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_SECS),
            archive_retention_days: DEFAULT_ARCHIVE_RETENTION_DAYS,
            extractor_url: None,
            extractor_token: None,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            nav_timeout_ms: DEFAULT_NAV_TIMEOUT_MS,
            page_concurrency: DEFAULT_PAGE_CONCURRENCY,
            maintenance_tick: Duration::from_secs(DEFAULT_MAINTENANCE_TICK_SECS),
            schedule_every: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: read_env_string("PRICEWATCH_DB")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            providers_path: read_env_string("PRICEWATCH_PROVIDERS")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.providers_path),
            freshness_window: Duration::from_secs(read_env_u64(
                "PRICEWATCH_FRESHNESS_SECS",
                DEFAULT_FRESHNESS_SECS,
            )),
            lease_ttl: Duration::from_secs(
                read_env_u64("PRICEWATCH_LEASE_SECS", DEFAULT_LEASE_SECS).max(1),
            ),
            archive_retention_days: read_env_u32(
                "PRICEWATCH_ARCHIVE_RETENTION_DAYS",
                DEFAULT_ARCHIVE_RETENTION_DAYS,
            )
            .max(1),
            extractor_url: read_env_string("PRICEWATCH_EXTRACTOR_URL").filter(|v| !v.is_empty()),
            extractor_token: read_env_string("PRICEWATCH_EXTRACTOR_TOKEN")
                .filter(|v| !v.is_empty()),
            http_timeout_ms: read_env_u64("PRICEWATCH_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)
                .max(1),
            nav_timeout_ms: read_env_u64("PRICEWATCH_NAV_TIMEOUT_MS", DEFAULT_NAV_TIMEOUT_MS)
                .max(1),
            page_concurrency: read_env_usize(
                "PRICEWATCH_PAGE_CONCURRENCY",
                DEFAULT_PAGE_CONCURRENCY,
            )
            .max(1),
            maintenance_tick: Duration::from_secs(
                read_env_u64(
                    "PRICEWATCH_MAINTENANCE_TICK_SECS",
                    DEFAULT_MAINTENANCE_TICK_SECS,
                )
                .max(1),
            ),
            schedule_every: match read_env_u64("PRICEWATCH_SCHEDULE_SECS", 0) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// `~/.pricewatch`, or `./.pricewatch` when there is no home directory.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pricewatch")
}

/// `providers.json` in `dir` when present, else `~/.pricewatch/providers.json`.
pub fn default_providers_path(dir: &Path) -> PathBuf {
    let local = dir.join(PROVIDERS_FILE);
    if local.is_file() {
        local
    } else {
        default_data_dir().join(PROVIDERS_FILE)
    }
}

pub(crate) fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_value)
}

pub(crate) fn read_env_u32(name: &str, default_value: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default_value)
}

pub(crate) fn read_env_usize(name: &str, default_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default_value)
}

pub(crate) fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}
