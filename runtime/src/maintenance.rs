//! Autonomous runtime maintenance loop.
//!
//! Purges expired archive entries, sweeps dead leases and stale failure
//! records, and (when a schedule is configured) refreshes every provider
//! while the daemon is active.

use crate::config::RuntimeConfig;
use crate::coordinator::RefreshCoordinator;
use crate::events::RefreshEvent;
use crate::store::SnapshotStore;
use chrono::{Days, NaiveDate, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub tick_every: Duration,
    pub archive_retention_days: u32,
    pub schedule_every: Option<Duration>,
}

impl MaintenanceConfig {
    pub fn from_runtime(cfg: &RuntimeConfig) -> Self {
        Self {
            tick_every: cfg.maintenance_tick,
            archive_retention_days: cfg.archive_retention_days,
            schedule_every: cfg.schedule_every,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub archive_purged: usize,
    pub expired_swept: usize,
}

/// Oldest archive day kept under a retention of `retention_days`.
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// One maintenance pass. Failures are logged; the pass never aborts.
pub async fn run_once(
    store: &dyn SnapshotStore,
    retention_days: u32,
    today: NaiveDate,
) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    let cutoff = retention_cutoff(today, retention_days);
    match store.purge_archive(cutoff).await {
        Ok(removed) => {
            if removed > 0 {
                tracing::info!(%cutoff, "maintenance purged {removed} archived snapshot(s)");
            }
            report.archive_purged = removed;
        }
        Err(e) => tracing::warn!("maintenance archive purge failed: {e}"),
    }

    match store.sweep_expired().await {
        Ok(swept) => {
            if swept > 0 {
                tracing::info!("maintenance swept {swept} expired lease(s)/failure record(s)");
            }
            report.expired_swept = swept;
        }
        Err(e) => tracing::warn!("maintenance sweep failed: {e}"),
    }

    report
}

/// Spawn background maintenance until daemon shutdown is signaled.
pub fn spawn(
    coordinator: Arc<RefreshCoordinator>,
    cfg: MaintenanceConfig,
    shutdown: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "maintenance loop started: tick={}s retention={}d schedule={}",
            cfg.tick_every.as_secs(),
            cfg.archive_retention_days,
            cfg.schedule_every
                .map(|d| format!("{}s", d.as_secs()))
                .unwrap_or_else(|| "off".to_string())
        );
        let mut ticker = tokio::time::interval(cfg.tick_every);
        let mut last_scheduled: Option<Instant> = None;
        // created up front so a signal during a pass is not missed
        let stop = shutdown.notified();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::info!("maintenance loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let report = run_once(
                        coordinator.store().as_ref(),
                        cfg.archive_retention_days,
                        Utc::now().date_naive(),
                    )
                    .await;
                    coordinator.events().emit(RefreshEvent::MaintenanceCompleted {
                        archive_purged: report.archive_purged,
                        leases_swept: report.expired_swept,
                    });

                    if let Some(every) = cfg.schedule_every {
                        let due = last_scheduled.map(|t| t.elapsed() >= every).unwrap_or(true);
                        if due {
                            last_scheduled = Some(Instant::now());
                            run_scheduled_refresh(&coordinator).await;
                        }
                    }
                }
            }
        }
    })
}

async fn run_scheduled_refresh(coordinator: &Arc<RefreshCoordinator>) {
    let results = coordinator.refresh_all(false).await;
    let mut started = 0usize;
    for (provider, result) in results {
        match result {
            Ok(outcome) => {
                tracing::debug!(provider = %provider, status = outcome.status(), "scheduled trigger");
                started += 1;
            }
            Err(e) => tracing::warn!(provider = %provider, "scheduled refresh failed to start: {e}"),
        }
    }
    tracing::info!("scheduled refresh triggered for {started} provider(s)");
}
