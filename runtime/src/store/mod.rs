//! Snapshot persistence: current pointer, dated archive, failure records,
//! and refresh leases.
//!
//! Readers only ever see committed snapshots. `commit` makes the new snapshot
//! current before it is archived, so a crash in between loses at most an
//! archive entry, never the current pointer.

pub mod fallback;
pub mod memory;
pub mod sqlite;

pub use fallback::{read_best_effort, BestEffort};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use pricewatch::{FailureRecord, Lease, PricingSnapshot, StoreError, StoreResult};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The latest accepted snapshot for a provider.
    async fn current(&self, provider: &str) -> StoreResult<Option<PricingSnapshot>>;

    /// Make `snapshot` current and archive it under its calendar day.
    ///
    /// A same-day archive entry is overwritten.
    async fn commit(&self, provider: &str, snapshot: &PricingSnapshot) -> StoreResult<()>;

    /// The snapshot archived for `date`, if any.
    async fn archived(&self, provider: &str, date: NaiveDate)
        -> StoreResult<Option<PricingSnapshot>>;

    /// Archived days for a provider, newest first.
    async fn archived_dates(&self, provider: &str) -> StoreResult<Vec<NaiveDate>>;

    /// Replace the provider's last failure record.
    async fn record_failure(&self, provider: &str, record: &FailureRecord) -> StoreResult<()>;

    /// The last failure record, unless it has expired.
    async fn last_failure(&self, provider: &str) -> StoreResult<Option<FailureRecord>>;

    /// Take the provider's lease if it is free or expired.
    ///
    /// Returns `None` when another job holds an unexpired lease. The
    /// check-and-set is atomic.
    async fn acquire_lease(
        &self,
        provider: &str,
        job_id: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Lease>>;

    /// Drop the lease if `job_id` still holds it. Returns whether it did.
    async fn release_lease(&self, provider: &str, job_id: &str) -> StoreResult<bool>;

    /// The unexpired lease on a provider, if any.
    async fn lease(&self, provider: &str) -> StoreResult<Option<Lease>>;

    /// Delete archive entries strictly older than `before`. Returns the count.
    async fn purge_archive(&self, before: NaiveDate) -> StoreResult<usize>;

    /// Delete expired leases and failure records. Returns the count.
    async fn sweep_expired(&self) -> StoreResult<usize>;
}

pub(crate) fn check_provider(provider: &str, snapshot: &PricingSnapshot) -> StoreResult<()> {
    if snapshot.provider != provider {
        return Err(StoreError::Backend(format!(
            "snapshot for {} committed under {provider}",
            snapshot.provider
        )));
    }
    Ok(())
}
