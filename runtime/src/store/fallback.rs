//! Best-effort reads for the serving layer.
//!
//! Walks current, yesterday's archive, last week's archive, then the
//! provider's bundled default. Store errors along the way are logged and
//! skipped: this read never fails.

use super::SnapshotStore;
use chrono::{Days, NaiveDate};
use pricewatch::PricingSnapshot;
use serde::Serialize;
use serde_json::Value;

/// Archive offsets (in days before today) tried after the current snapshot.
pub const ARCHIVE_FALLBACK_DAYS: [u64; 2] = [1, 7];

/// What a best-effort read found, tagged by where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum BestEffort {
    Current { snapshot: PricingSnapshot },
    Archived { date: NaiveDate, snapshot: PricingSnapshot },
    Default { data: Value },
    NoData,
}

impl BestEffort {
    /// The pricing document, wherever it came from.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Current { snapshot } | Self::Archived { snapshot, .. } => Some(&snapshot.data),
            Self::Default { data } => Some(data),
            Self::NoData => None,
        }
    }

    pub fn snapshot(&self) -> Option<&PricingSnapshot> {
        match self {
            Self::Current { snapshot } | Self::Archived { snapshot, .. } => Some(snapshot),
            Self::Default { .. } | Self::NoData => None,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Current { .. } => "current",
            Self::Archived { .. } => "archived",
            Self::Default { .. } => "default",
            Self::NoData => "no_data",
        }
    }
}

pub async fn read_best_effort(
    store: &dyn SnapshotStore,
    provider: &str,
    default_data: Option<&Value>,
    today: NaiveDate,
) -> BestEffort {
    match store.current(provider).await {
        Ok(Some(snapshot)) => return BestEffort::Current { snapshot },
        Ok(None) => {}
        Err(e) => tracing::warn!(provider, "current snapshot unreadable: {e}"),
    }

    for days in ARCHIVE_FALLBACK_DAYS {
        let Some(date) = today.checked_sub_days(Days::new(days)) else {
            continue;
        };
        match store.archived(provider, date).await {
            Ok(Some(snapshot)) => {
                tracing::info!(provider, %date, "serving archived snapshot");
                return BestEffort::Archived { date, snapshot };
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(provider, %date, "archived snapshot unreadable: {e}"),
        }
    }

    match default_data {
        Some(data) => {
            tracing::info!(provider, "serving bundled default data");
            BestEffort::Default { data: data.clone() }
        }
        None => {
            tracing::warn!(provider, "no pricing data available");
            BestEffort::NoData
        }
    }
}
