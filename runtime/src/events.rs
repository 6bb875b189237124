// Copyright 2026 Pricewatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Refresh event bus — typed progress events from the coordinator.
//!
//! The EventBus is a `tokio::sync::broadcast` channel that carries
//! [`RefreshEvent`] values. The CLI watches it while waiting on a refresh
//! and the daemon logs it. When no subscribers exist, events are dropped.

use crate::coordinator::RefreshStage;
use pricewatch::{AcquisitionMethod, FailureKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a trigger did not start a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Fresh,
    AlreadyRunning,
}

/// Every event the refresh pipeline emits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RefreshEvent {
    /// A lease was taken and a pipeline run is starting.
    RefreshStarted {
        provider: String,
        job_id: String,
        forced: bool,
        background: bool,
    },
    /// The run moved to a new stage.
    StageChanged {
        provider: String,
        job_id: String,
        stage: RefreshStage,
    },
    /// One page finished acquisition (successfully or not).
    PageAcquired {
        provider: String,
        url: String,
        via: AcquisitionMethod,
        chars: usize,
        error: Option<String>,
    },
    /// A new snapshot was committed.
    RefreshAccepted {
        provider: String,
        job_id: String,
        confidence: f64,
        warnings: usize,
        elapsed_ms: u64,
    },
    /// The candidate was rejected and the current snapshot kept.
    RefreshRejected {
        provider: String,
        job_id: String,
        confidence: f64,
        errors: Vec<String>,
    },
    /// The run failed before a verdict.
    RefreshFailed {
        provider: String,
        job_id: String,
        kind: FailureKind,
        error: String,
        elapsed_ms: u64,
    },
    /// A trigger returned without running.
    RefreshSkipped { provider: String, reason: SkipReason },
    /// A maintenance pass finished.
    MaintenanceCompleted {
        archive_purged: usize,
        leases_swept: usize,
    },
}

impl RefreshEvent {
    /// Provider the event is about; `None` for system events.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RefreshStarted { provider, .. }
            | Self::StageChanged { provider, .. }
            | Self::PageAcquired { provider, .. }
            | Self::RefreshAccepted { provider, .. }
            | Self::RefreshRejected { provider, .. }
            | Self::RefreshFailed { provider, .. }
            | Self::RefreshSkipped { provider, .. } => Some(provider),
            Self::MaintenanceCompleted { .. } => None,
        }
    }

    /// Whether this event ends a run for its provider.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RefreshAccepted { .. } | Self::RefreshRejected { .. } | Self::RefreshFailed { .. }
        )
    }
}

/// The central event bus for refresh progress.
pub struct EventBus {
    sender: broadcast::Sender<RefreshEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: RefreshEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Check if an event concerns a specific provider.
///
/// System events are not provider-specific and match every filter.
pub fn event_matches_provider(event: &RefreshEvent, provider: &str) -> bool {
    event.provider().map(|p| p == provider).unwrap_or(true)
}
