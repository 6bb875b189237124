//! `pricewatch refresh` and `pricewatch refresh-all`.

use crate::cli::context::Runtime;
use crate::cli::output::{self, Styled};
use crate::coordinator::{RefreshCoordinator, RefreshOutcome, RefreshRequest};
use crate::events::{event_matches_provider, RefreshEvent};
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Refresh one provider in the foreground and report the verdict.
pub async fn run(rt: &Runtime, provider: &str, force: bool) -> Result<()> {
    rt.provider(provider)?;
    let coordinator = rt.coordinator().await?;
    let progress = watch_progress(&coordinator, Some(provider.to_string()));

    let outcome = coordinator
        .trigger(RefreshRequest::new(provider).force(force).wait(true))
        .await;
    progress.abort();
    coordinator.shutdown().await;
    let outcome = outcome?;

    report(provider, &outcome);
    if matches!(outcome, RefreshOutcome::Failed { .. }) {
        std::process::exit(1);
    }
    Ok(())
}

/// Trigger background refreshes of every provider and wait for them to drain.
pub async fn run_all(rt: &Runtime, force: bool) -> Result<()> {
    let coordinator = rt.coordinator().await?;
    let mut rx = coordinator.events().subscribe();
    let progress = watch_progress(&coordinator, None);

    let started = coordinator.refresh_all(force).await;
    coordinator.shutdown().await;
    progress.abort();

    let mut finished: Vec<RefreshEvent> = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) if event.is_terminal() => finished.push(event),
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    if output::is_json() {
        let triggers: Vec<_> = started
            .iter()
            .map(|(id, r)| match r {
                Ok(outcome) => json!({"provider": id, "status": outcome.status()}),
                Err(e) => json!({"provider": id, "status": "error", "message": e.to_string()}),
            })
            .collect();
        output::print_json(&json!({"triggered": triggers, "finished": finished}));
        return Ok(());
    }
    if output::is_quiet() {
        return Ok(());
    }

    let s = Styled::new();
    for (id, result) in &started {
        let line = match result {
            Ok(RefreshOutcome::AcceptedWithSnapshot { refreshed: false, .. }) => {
                format!("{} {id}: still fresh", s.ok_sym())
            }
            Ok(RefreshOutcome::AlreadyRunning { .. }) => {
                format!("{} {id}: already running elsewhere", s.warn_sym())
            }
            Ok(RefreshOutcome::AcceptedAsync { .. }) => {
                match finished.iter().find(|e| event_matches_provider(e, id)) {
                    Some(RefreshEvent::RefreshAccepted { confidence, .. }) => {
                        format!("{} {id}: updated (confidence {confidence:.2})", s.ok_sym())
                    }
                    Some(RefreshEvent::RefreshRejected { errors, .. }) => format!(
                        "{} {id}: rejected, kept previous ({})",
                        s.warn_sym(),
                        errors.join("; ")
                    ),
                    Some(RefreshEvent::RefreshFailed { error, .. }) => {
                        format!("{} {id}: failed: {error}", s.err_sym())
                    }
                    _ => format!("{} {id}: finished", s.dim("?")),
                }
            }
            Ok(other) => format!("{} {id}: {}", s.dim("?"), other.status()),
            Err(e) => format!("{} {id}: {e}", s.err_sym()),
        };
        println!("  {line}");
    }
    Ok(())
}

/// Print stage progress to stderr while runs are in flight.
fn watch_progress(
    coordinator: &Arc<RefreshCoordinator>,
    provider: Option<String>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = coordinator.events().subscribe();
    let s = Styled::new();
    tokio::spawn(async move {
        if output::is_quiet() || output::is_json() {
            return;
        }
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if let Some(p) = &provider {
                if !event_matches_provider(&event, p) {
                    continue;
                }
            }
            match event {
                RefreshEvent::StageChanged { provider, stage, .. } => {
                    eprintln!("  {} {provider}: {}", s.dim("·"), s.dim(&format!("{stage:?}").to_lowercase()));
                }
                RefreshEvent::PageAcquired { url, via, error: Some(err), .. } => {
                    eprintln!("  {} {url} ({via:?}): {err}", s.warn_sym());
                }
                RefreshEvent::PageAcquired { url, via, chars, .. } => {
                    eprintln!("  {} {url} ({via:?}, {chars} chars)", s.dim("·"));
                }
                _ => {}
            }
        }
    })
}

fn report(provider: &str, outcome: &RefreshOutcome) {
    if output::is_json() {
        output::print_json(outcome);
        return;
    }
    if output::is_quiet() {
        return;
    }
    let s = Styled::new();
    match outcome {
        RefreshOutcome::AcceptedWithSnapshot {
            snapshot,
            refreshed,
            ..
        } => {
            let verb = if *refreshed { "updated" } else { "still fresh" };
            println!(
                "  {} {provider}: {verb} (confidence {:.2}, {} source(s), {})",
                s.ok_sym(),
                snapshot.metadata.confidence,
                snapshot.sources.len(),
                snapshot.scraped_at.to_rfc3339()
            );
        }
        RefreshOutcome::RejectedStaleKept {
            validation, kept, ..
        } => {
            println!(
                "  {} {provider}: candidate rejected (confidence {:.2}); {}",
                s.warn_sym(),
                validation.confidence,
                if kept.is_some() {
                    "previous snapshot kept"
                } else {
                    "no snapshot yet"
                }
            );
            for e in &validation.errors {
                println!("      {} {e}", s.err_sym());
            }
            for w in &validation.warnings {
                println!("      {} {w}", s.dim("-"));
            }
        }
        RefreshOutcome::AlreadyRunning { job_id } => {
            println!(
                "  {} {provider}: refresh already running{}",
                s.warn_sym(),
                job_id
                    .as_deref()
                    .map(|j| format!(" (job {j})"))
                    .unwrap_or_default()
            );
        }
        RefreshOutcome::Failed { kind, message, .. } => {
            println!("  {} {provider}: {kind:?} failure: {message}", s.err_sym());
        }
        RefreshOutcome::AcceptedAsync { job_id } => {
            println!("  {} {provider}: started job {job_id}", s.ok_sym());
        }
    }
}
