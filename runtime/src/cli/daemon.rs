// Copyright 2026 Pricewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! `pricewatch daemon` and `pricewatch purge`.

use crate::cli::context::Runtime;
use crate::cli::output::{self, Styled};
use crate::events::RefreshEvent;
use crate::maintenance::{self, MaintenanceConfig};
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::info;

/// Run maintenance (and scheduled refreshes) until interrupted.
pub async fn run(rt: &Runtime) -> Result<()> {
    let s = Styled::new();
    let coordinator = rt.coordinator().await?;
    let cfg = MaintenanceConfig::from_runtime(&rt.config);

    info!(
        "starting pricewatch v{} with {} provider(s)",
        env!("CARGO_PKG_VERSION"),
        rt.registry.len()
    );
    if !output::is_quiet() {
        eprintln!(
            "  {} pricewatch daemon v{} started (PID {})",
            s.ok_sym(),
            env!("CARGO_PKG_VERSION"),
            std::process::id()
        );
        if cfg.schedule_every.is_none() {
            eprintln!("  Scheduled refresh is off; set PRICEWATCH_SCHEDULE_SECS to enable it.");
        }
    }

    let shutdown = Arc::new(Notify::new());
    let stopped = shutdown.notified();
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        shutdown_signal.notify_waiters();
    });

    let mut rx = coordinator.events().subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("event log skipped {n} event(s)")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let loop_handle = maintenance::spawn(Arc::clone(&coordinator), cfg, Arc::clone(&shutdown));
    stopped.await;
    let _ = loop_handle.await;

    info!(
        in_flight = coordinator.in_flight().await,
        "waiting for in-flight refreshes"
    );
    coordinator.shutdown().await;
    logger.abort();

    if !output::is_quiet() {
        eprintln!("  {} pricewatch daemon stopped.", s.ok_sym());
    }
    Ok(())
}

/// One maintenance pass, then exit.
pub async fn purge(rt: &Runtime) -> Result<()> {
    let report = maintenance::run_once(
        rt.store.as_ref(),
        rt.config.archive_retention_days,
        Utc::now().date_naive(),
    )
    .await;

    if output::is_json() {
        output::print_json(&json!({
            "archivePurged": report.archive_purged,
            "expiredSwept": report.expired_swept,
            "retentionDays": rt.config.archive_retention_days,
        }));
    } else if !output::is_quiet() {
        println!(
            "  {} purged {} archived snapshot(s) older than {} days, swept {} expired record(s)",
            Styled::new().ok_sym(),
            report.archive_purged,
            rt.config.archive_retention_days,
            report.expired_swept
        );
    }
    Ok(())
}

fn log_event(event: &RefreshEvent) {
    match event {
        RefreshEvent::RefreshAccepted {
            provider,
            confidence,
            warnings,
            elapsed_ms,
            ..
        } => info!(%provider, confidence, warnings, elapsed_ms, "refresh accepted"),
        RefreshEvent::RefreshRejected {
            provider, errors, ..
        } => info!(%provider, ?errors, "refresh rejected"),
        RefreshEvent::RefreshFailed {
            provider, kind, error, ..
        } => info!(%provider, ?kind, %error, "refresh failed"),
        RefreshEvent::MaintenanceCompleted {
            archive_purged,
            leases_swept,
        } => tracing::debug!(archive_purged, leases_swept, "maintenance pass"),
        _ => {}
    }
}
