//! Durable store backed by a single SQLite file.
//!
//! Snapshots and failure records are stored as their JSON wire form, so the
//! rows can be served verbatim. Lease times are unix milliseconds to keep
//! the expiry comparison inside SQL.

use super::{check_provider, SnapshotStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pricewatch::{FailureRecord, Lease, PricingSnapshot, StoreError, StoreResult};
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS current_snapshots (
    provider TEXT PRIMARY KEY,
    scraped_at TEXT NOT NULL,
    snapshot TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS archived_snapshots (
    provider TEXT NOT NULL,
    day TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    PRIMARY KEY (provider, day)
);
CREATE TABLE IF NOT EXISTS failure_records (
    provider TEXT PRIMARY KEY,
    recorded_at INTEGER NOT NULL,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS leases (
    provider TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
";

pub struct SqliteStore {
    db: Mutex<Connection>,
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_day(raw: &str) -> StoreResult<NaiveDate> {
    raw.parse::<NaiveDate>()
        .map_err(|e| StoreError::Backend(format!("bad archive day {raw:?}: {e}")))
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {ms}")))
}

impl SqliteStore {
    /// Open or create a store at `path`, creating parent directories.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path).map_err(backend)?;
        db.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(backend)?;
        Self::init(db)
    }

    /// A private, non-persistent store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(db: Connection) -> StoreResult<Self> {
        db.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Backend("store connection mutex poisoned".to_string()))
    }

    fn load_snapshot(raw: Option<String>) -> StoreResult<Option<PricingSnapshot>> {
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn query_text(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Option<String>> {
        let db = self.conn()?;
        let result = db.query_row(sql, params, |row| row.get::<_, String>(0));
        match result {
            Ok(text) => Ok(Some(text)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(backend(e)),
        }
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn current(&self, provider: &str) -> StoreResult<Option<PricingSnapshot>> {
        let raw = self.query_text(
            "SELECT snapshot FROM current_snapshots WHERE provider = ?1",
            rusqlite::params![provider],
        )?;
        Self::load_snapshot(raw)
    }

    async fn commit(&self, provider: &str, snapshot: &PricingSnapshot) -> StoreResult<()> {
        check_provider(provider, snapshot)?;
        let json = serde_json::to_string(snapshot)?;
        let day = snapshot.archive_date().to_string();

        let mut db = self.conn()?;
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        tx.execute(
            "INSERT OR REPLACE INTO current_snapshots (provider, scraped_at, snapshot)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![provider, snapshot.scraped_at.to_rfc3339(), json],
        )
        .map_err(backend)?;
        tx.execute(
            "INSERT OR REPLACE INTO archived_snapshots (provider, day, snapshot)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![provider, day, json],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(())
    }

    async fn archived(
        &self,
        provider: &str,
        date: NaiveDate,
    ) -> StoreResult<Option<PricingSnapshot>> {
        let raw = self.query_text(
            "SELECT snapshot FROM archived_snapshots WHERE provider = ?1 AND day = ?2",
            rusqlite::params![provider, date.to_string()],
        )?;
        Self::load_snapshot(raw)
    }

    async fn archived_dates(&self, provider: &str) -> StoreResult<Vec<NaiveDate>> {
        let db = self.conn()?;
        let mut stmt = db
            .prepare("SELECT day FROM archived_snapshots WHERE provider = ?1 ORDER BY day DESC")
            .map_err(backend)?;
        let days = stmt
            .query_map(rusqlite::params![provider], |row| row.get::<_, String>(0))
            .map_err(backend)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(backend)?;
        days.iter().map(|d| parse_day(d)).collect()
    }

    async fn record_failure(&self, provider: &str, record: &FailureRecord) -> StoreResult<()> {
        let json = serde_json::to_string(record)?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO failure_records (provider, recorded_at, record)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![provider, record.recorded_at.timestamp_millis(), json],
            )
            .map_err(backend)?;
        Ok(())
    }

    async fn last_failure(&self, provider: &str) -> StoreResult<Option<FailureRecord>> {
        let raw = self.query_text(
            "SELECT record FROM failure_records WHERE provider = ?1",
            rusqlite::params![provider],
        )?;
        let Some(json) = raw else {
            return Ok(None);
        };
        let record: FailureRecord = serde_json::from_str(&json)?;
        Ok((!record.is_expired(Utc::now())).then_some(record))
    }

    async fn acquire_lease(
        &self,
        provider: &str,
        job_id: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Lease>> {
        let lease = Lease::new(provider, job_id, Utc::now(), ttl);
        let now_ms = lease.acquired_at.timestamp_millis();

        let mut db = self.conn()?;
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        tx.execute(
            "DELETE FROM leases WHERE provider = ?1 AND expires_at <= ?2",
            rusqlite::params![provider, now_ms],
        )
        .map_err(backend)?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO leases (provider, job_id, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    provider,
                    job_id,
                    now_ms,
                    lease.expires_at.timestamp_millis()
                ],
            )
            .map_err(backend)?;
        tx.commit().map_err(backend)?;

        Ok((inserted == 1).then_some(lease))
    }

    async fn release_lease(&self, provider: &str, job_id: &str) -> StoreResult<bool> {
        let rows = self
            .conn()?
            .execute(
                "DELETE FROM leases WHERE provider = ?1 AND job_id = ?2",
                rusqlite::params![provider, job_id],
            )
            .map_err(backend)?;
        Ok(rows > 0)
    }

    async fn lease(&self, provider: &str) -> StoreResult<Option<Lease>> {
        let db = self.conn()?;
        let result = db.query_row(
            "SELECT job_id, acquired_at, expires_at FROM leases
             WHERE provider = ?1 AND expires_at > ?2",
            rusqlite::params![provider, Utc::now().timestamp_millis()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        );
        match result {
            Ok((job_id, acquired, expires)) => Ok(Some(Lease {
                provider: provider.to_string(),
                job_id,
                acquired_at: from_millis(acquired)?,
                expires_at: from_millis(expires)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(backend(e)),
        }
    }

    async fn purge_archive(&self, before: NaiveDate) -> StoreResult<usize> {
        // ISO dates sort lexically
        self.conn()?
            .execute(
                "DELETE FROM archived_snapshots WHERE day < ?1",
                rusqlite::params![before.to_string()],
            )
            .map_err(backend)
    }

    async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let failure_cutoff = now - Duration::days(pricewatch::FAILURE_RETENTION_DAYS);
        let db = self.conn()?;
        let leases = db
            .execute(
                "DELETE FROM leases WHERE expires_at <= ?1",
                rusqlite::params![now.timestamp_millis()],
            )
            .map_err(backend)?;
        let failures = db
            .execute(
                "DELETE FROM failure_records WHERE recorded_at < ?1",
                rusqlite::params![failure_cutoff.timestamp_millis()],
            )
            .map_err(backend)?;
        Ok(leases + failures)
    }
}
