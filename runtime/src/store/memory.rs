//! In-process store backed by concurrent maps. Used by tests and `--db :memory:`.

use super::{check_provider, SnapshotStore};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pricewatch::{FailureRecord, Lease, PricingSnapshot, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    current: DashMap<String, PricingSnapshot>,
    archive: DashMap<(String, NaiveDate), PricingSnapshot>,
    failures: DashMap<String, FailureRecord>,
    leases: DashMap<String, Lease>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn current(&self, provider: &str) -> StoreResult<Option<PricingSnapshot>> {
        Ok(self.current.get(provider).map(|s| s.value().clone()))
    }

    async fn commit(&self, provider: &str, snapshot: &PricingSnapshot) -> StoreResult<()> {
        check_provider(provider, snapshot)?;
        self.current.insert(provider.to_string(), snapshot.clone());
        self.archive.insert(
            (provider.to_string(), snapshot.archive_date()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn archived(
        &self,
        provider: &str,
        date: NaiveDate,
    ) -> StoreResult<Option<PricingSnapshot>> {
        Ok(self
            .archive
            .get(&(provider.to_string(), date))
            .map(|s| s.value().clone()))
    }

    async fn archived_dates(&self, provider: &str) -> StoreResult<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = self
            .archive
            .iter()
            .filter(|e| e.key().0 == provider)
            .map(|e| e.key().1)
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    async fn record_failure(&self, provider: &str, record: &FailureRecord) -> StoreResult<()> {
        self.failures.insert(provider.to_string(), record.clone());
        Ok(())
    }

    async fn last_failure(&self, provider: &str) -> StoreResult<Option<FailureRecord>> {
        let now = Utc::now();
        Ok(self
            .failures
            .get(provider)
            .map(|r| r.value().clone())
            .filter(|r| !r.is_expired(now)))
    }

    async fn acquire_lease(
        &self,
        provider: &str,
        job_id: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Lease>> {
        let now = Utc::now();
        let lease = Lease::new(provider, job_id, now, ttl);
        // The entry guard holds the shard lock, so check-and-set is atomic.
        match self.leases.entry(provider.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().is_expired(now) {
                    held.insert(lease.clone());
                    Ok(Some(lease))
                } else {
                    Ok(None)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
                Ok(Some(lease))
            }
        }
    }

    async fn release_lease(&self, provider: &str, job_id: &str) -> StoreResult<bool> {
        Ok(self
            .leases
            .remove_if(provider, |_, lease| lease.job_id == job_id)
            .is_some())
    }

    async fn lease(&self, provider: &str) -> StoreResult<Option<Lease>> {
        let now = Utc::now();
        Ok(self
            .leases
            .get(provider)
            .map(|l| l.value().clone())
            .filter(|l| !l.is_expired(now)))
    }

    async fn purge_archive(&self, before: NaiveDate) -> StoreResult<usize> {
        let before_len = self.archive.len();
        self.archive.retain(|(_, date), _| *date >= before);
        Ok(before_len - self.archive.len())
    }

    async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let leases = self.leases.len();
        self.leases.retain(|_, lease| !lease.is_expired(now));
        let failures = self.failures.len();
        self.failures.retain(|_, record| !record.is_expired(now));
        Ok((leases - self.leases.len()) + (failures - self.failures.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricewatch::{SnapshotMetadata, SCHEMA_VERSION};
    use serde_json::json;
    use std::sync::Arc;

    fn snapshot(provider: &str, days_ago: i64) -> PricingSnapshot {
        PricingSnapshot {
            provider: provider.into(),
            scraped_at: Utc::now() - Duration::days(days_ago),
            sources: Vec::new(),
            data: json!({"tiers": [{"name": "Pro", "price": days_ago}]}),
            metadata: SnapshotMetadata {
                confidence: 0.8,
                extraction_model: "m".into(),
                processing_time: 10,
                schema_version: SCHEMA_VERSION.into(),
            },
        }
    }

    #[tokio::test]
    async fn test_commit_sets_current_and_archive() {
        let store = MemoryStore::new();
        let old = snapshot("fly", 3);
        let new = snapshot("fly", 0);
        store.commit("fly", &old).await.unwrap();
        store.commit("fly", &new).await.unwrap();

        assert_eq!(store.current("fly").await.unwrap(), Some(new.clone()));
        assert_eq!(
            store.archived("fly", old.archive_date()).await.unwrap(),
            Some(old.clone())
        );
        assert_eq!(
            store.archived_dates("fly").await.unwrap(),
            vec![new.archive_date(), old.archive_date()]
        );
        assert!(store.commit("render", &new).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_keeps_boundary_day() {
        let store = MemoryStore::new();
        for days in [0, 5, 10] {
            store.commit("fly", &snapshot("fly", days)).await.unwrap();
        }
        let cutoff = (Utc::now() - Duration::days(5)).date_naive();
        assert_eq!(store.purge_archive(cutoff).await.unwrap(), 1);
        assert_eq!(store.archived_dates("fly").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lease_exclusive_until_released() {
        let store = MemoryStore::new();
        let ttl = Duration::minutes(5);
        assert!(store.acquire_lease("fly", "a", ttl).await.unwrap().is_some());
        assert!(store.acquire_lease("fly", "b", ttl).await.unwrap().is_none());
        assert_eq!(store.lease("fly").await.unwrap().unwrap().job_id, "a");

        assert!(!store.release_lease("fly", "b").await.unwrap());
        assert!(store.release_lease("fly", "a").await.unwrap());
        assert!(store.acquire_lease("fly", "b", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let store = MemoryStore::new();
        store
            .acquire_lease("fly", "stuck", Duration::milliseconds(1))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.lease("fly").await.unwrap().is_none());
        let taken = store
            .acquire_lease("fly", "fresh", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(taken.unwrap().job_id, "fresh");
        assert!(!store.release_lease("fly", "stuck").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .acquire_lease("fly", &format!("job-{i}"), Duration::minutes(5))
                    .await
                    .unwrap()
                    .is_some()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
