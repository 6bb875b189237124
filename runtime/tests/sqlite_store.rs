//! SQLite snapshot store behaviour on a real database file.

mod common;

use chrono::{Days, Duration, Utc};
use common::{snapshot, tiers};
use pricewatch::{FailureRecord, PricingSnapshot, StoreError, ValidationOutcome};
use pricewatch_runtime::maintenance;
use pricewatch_runtime::store::{SnapshotStore, SqliteStore};
use serde_json::json;
use tempfile::TempDir;

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join("nested").join("pricewatch.db")).unwrap()
}

fn assert_same(a: &PricingSnapshot, b: &PricingSnapshot) {
    assert_eq!(a.provider, b.provider);
    assert_eq!(a.scraped_at, b.scraped_at);
    assert_eq!(a.data, b.data);
    assert_eq!(a.sources, b.sources);
    assert!((a.metadata.confidence - b.metadata.confidence).abs() < 1e-12);
}

fn rejection(provider: &str, job_id: &str, age: Duration) -> FailureRecord {
    FailureRecord {
        provider: provider.to_string(),
        job_id: job_id.to_string(),
        recorded_at: Utc::now() - age,
        validation: ValidationOutcome {
            accepted: false,
            confidence: 0.25,
            errors: vec!["extracted document is empty".to_string()],
            warnings: Vec::new(),
            layers: Vec::new(),
        },
        candidate: json!({}),
        extraction_model: "test-model".to_string(),
    }
}

#[tokio::test]
async fn test_commit_sets_current_and_archive() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    assert!(store.current("acme").await.unwrap().is_none());

    let snap = snapshot("acme", tiers(20.0), Duration::minutes(1));
    store.commit("acme", &snap).await.unwrap();

    assert_same(&store.current("acme").await.unwrap().unwrap(), &snap);
    let archived = store
        .archived("acme", snap.archive_date())
        .await
        .unwrap()
        .unwrap();
    assert_same(&archived, &snap);
    assert_eq!(
        store.archived_dates("acme").await.unwrap(),
        vec![snap.archive_date()]
    );
    assert!(store.current("globex").await.unwrap().is_none());
}

#[tokio::test]
async fn test_same_day_commit_overwrites_archive() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut first = snapshot("acme", tiers(20.0), Duration::zero());
    let mut second = snapshot("acme", tiers(25.0), Duration::zero());
    // pin both to the same calendar day
    let noon = Utc::now()
        .date_naive()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc();
    first.scraped_at = noon;
    second.scraped_at = noon + Duration::minutes(30);

    store.commit("acme", &first).await.unwrap();
    store.commit("acme", &second).await.unwrap();

    let day = second.archive_date();
    assert_eq!(store.archived_dates("acme").await.unwrap(), vec![day]);
    let archived = store.archived("acme", day).await.unwrap().unwrap();
    assert_eq!(archived.data, tiers(25.0));
    assert_eq!(store.current("acme").await.unwrap().unwrap().data, tiers(25.0));
}

#[tokio::test]
async fn test_commit_rejects_mismatched_provider() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let snap = snapshot("acme", tiers(20.0), Duration::zero());
    let err = store.commit("globex", &snap).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
    assert!(store.current("globex").await.unwrap().is_none());
}

#[tokio::test]
async fn test_archive_dates_newest_first_and_purge() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    for days in [400, 10, 2] {
        let snap = snapshot("acme", tiers(20.0), Duration::days(days));
        store.commit("acme", &snap).await.unwrap();
    }
    let today = Utc::now().date_naive();
    let dates = store.archived_dates("acme").await.unwrap();
    assert_eq!(dates.len(), 3);
    assert!(dates.windows(2).all(|w| w[0] > w[1]));

    let report = maintenance::run_once(&store, 365, today).await;
    assert_eq!(report.archive_purged, 1);
    let dates = store.archived_dates("acme").await.unwrap();
    assert_eq!(dates.len(), 2);
    assert!(dates.iter().all(|d| *d > today - Days::new(365)));
    // purge never touches the current pointer
    assert!(store.current("acme").await.unwrap().is_some());
}

#[tokio::test]
async fn test_lease_is_exclusive_until_released() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let ttl = Duration::minutes(5);

    let lease = store.acquire_lease("acme", "job-1", ttl).await.unwrap();
    assert_eq!(lease.as_ref().map(|l| l.job_id.as_str()), Some("job-1"));
    assert!(store.acquire_lease("acme", "job-2", ttl).await.unwrap().is_none());
    // leases are per provider
    assert!(store.acquire_lease("globex", "job-3", ttl).await.unwrap().is_some());

    assert_eq!(store.lease("acme").await.unwrap().unwrap().job_id, "job-1");
    assert!(!store.release_lease("acme", "job-2").await.unwrap());
    assert!(store.release_lease("acme", "job-1").await.unwrap());
    assert!(store.lease("acme").await.unwrap().is_none());

    assert!(store.acquire_lease("acme", "job-2", ttl).await.unwrap().is_some());
}

#[tokio::test]
async fn test_expired_lease_can_be_taken_over() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .acquire_lease("acme", "crashed", Duration::zero())
        .await
        .unwrap()
        .unwrap();
    assert!(store.lease("acme").await.unwrap().is_none());

    let lease = store
        .acquire_lease("acme", "rescuer", Duration::minutes(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lease.job_id, "rescuer");
    // the crashed job can no longer release someone else's lease
    assert!(!store.release_lease("acme", "crashed").await.unwrap());
    assert_eq!(store.lease("acme").await.unwrap().unwrap().job_id, "rescuer");
}

#[tokio::test]
async fn test_failure_record_replaced_and_expires() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    assert!(store.last_failure("acme").await.unwrap().is_none());

    store
        .record_failure("acme", &rejection("acme", "job-1", Duration::hours(1)))
        .await
        .unwrap();
    store
        .record_failure("acme", &rejection("acme", "job-2", Duration::zero()))
        .await
        .unwrap();
    let record = store.last_failure("acme").await.unwrap().unwrap();
    assert_eq!(record.job_id, "job-2");
    assert_eq!(record.validation.errors.len(), 1);

    store
        .record_failure("globex", &rejection("globex", "old", Duration::days(31)))
        .await
        .unwrap();
    assert!(store.last_failure("globex").await.unwrap().is_none());

    store
        .acquire_lease("acme", "stale", Duration::zero())
        .await
        .unwrap();
    // one expired lease plus one expired failure record
    assert_eq!(store.sweep_expired().await.unwrap(), 2);
    assert!(store.last_failure("acme").await.unwrap().is_some());
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let snap = snapshot("acme", tiers(20.0), Duration::minutes(3));
    {
        let store = open(&dir);
        store.commit("acme", &snap).await.unwrap();
        store
            .record_failure("acme", &rejection("acme", "job-9", Duration::zero()))
            .await
            .unwrap();
    }

    let store = open(&dir);
    assert_same(&store.current("acme").await.unwrap().unwrap(), &snap);
    assert_eq!(
        store.last_failure("acme").await.unwrap().unwrap().job_id,
        "job-9"
    );
}
