//! Refresh coordinator: the state machine around one provider refresh.
//!
//! A trigger serves a fresh snapshot without work, otherwise takes the
//! provider's lease and runs acquire → extract → validate → commit. The lease
//! is released on every exit path; a crash leaves it to expire.
//!
//! ```text
//! Idle → Locked → Acquiring → Extracting → Validating → Committing → Idle
//!                                                    ↘ Rejected   → Idle
//! ```

use crate::acquisition::ContentAcquirer;
use crate::config::RuntimeConfig;
use crate::events::{EventBus, RefreshEvent, SkipReason};
use crate::extraction::{ExtractionRequest, Extractor};
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::store::{self, BestEffort, SnapshotStore};
use crate::tasks::BackgroundTasks;
use chrono::{Duration, Utc};
use futures::FutureExt;
use pricewatch::{
    ConfidenceEvaluator, EvaluationInput, FailureKind, FailureRecord, PricingSnapshot,
    RefreshError, SnapshotMetadata, SourceDescriptor, ValidationOutcome, SCHEMA_VERSION,
};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStage {
    Idle,
    Locked,
    Acquiring,
    Extracting,
    Validating,
    Committing,
    Rejected,
}

/// Timing rules for refreshes.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// A current snapshot younger than this is served as-is unless forced.
    pub freshness_window: Duration,
    pub lease_ttl: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            freshness_window: Duration::hours(1),
            lease_ttl: Duration::minutes(5),
        }
    }
}

impl RefreshPolicy {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        let defaults = Self::default();
        Self {
            freshness_window: Duration::from_std(cfg.freshness_window)
                .unwrap_or(defaults.freshness_window),
            lease_ttl: Duration::from_std(cfg.lease_ttl).unwrap_or(defaults.lease_ttl),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub provider: String,
    /// Skip the freshness check.
    pub force: bool,
    /// Run in the foreground and return the verdict.
    pub wait: bool,
}

impl RefreshRequest {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            force: false,
            wait: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// What a trigger produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A background run was started.
    AcceptedAsync { job_id: String },
    /// Another job holds the provider's lease.
    AlreadyRunning { job_id: Option<String> },
    /// The candidate failed validation; `kept` is the unchanged current snapshot.
    RejectedStaleKept {
        job_id: String,
        validation: ValidationOutcome,
        kept: Option<PricingSnapshot>,
    },
    /// A snapshot is available: freshly committed (`refreshed`) or still fresh.
    AcceptedWithSnapshot {
        job_id: Option<String>,
        snapshot: PricingSnapshot,
        refreshed: bool,
    },
    /// A foreground run failed before reaching a verdict.
    Failed {
        job_id: String,
        kind: FailureKind,
        message: String,
    },
}

impl RefreshOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::AcceptedAsync { .. } => "accepted_async",
            Self::AlreadyRunning { .. } => "already_running",
            Self::RejectedStaleKept { .. } => "rejected_stale_kept",
            Self::AcceptedWithSnapshot { .. } => "accepted_with_snapshot",
            Self::Failed { .. } => "failed",
        }
    }
}

pub struct RefreshCoordinator {
    registry: Arc<ProviderRegistry>,
    acquirer: Arc<dyn ContentAcquirer>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn SnapshotStore>,
    evaluator: ConfidenceEvaluator,
    policy: RefreshPolicy,
    events: Arc<EventBus>,
    tasks: BackgroundTasks,
}

impl RefreshCoordinator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        acquirer: Arc<dyn ContentAcquirer>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            registry,
            acquirer,
            extractor,
            store,
            evaluator: ConfidenceEvaluator::new(),
            policy: RefreshPolicy::default(),
            events: Arc::new(EventBus::default()),
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_evaluator(mut self, evaluator: ConfidenceEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    fn provider(&self, id: &str) -> Result<&ProviderDescriptor, RefreshError> {
        self.registry
            .get(id)
            .ok_or_else(|| RefreshError::UnknownProvider(id.to_string()))
    }

    /// Trigger a refresh.
    ///
    /// Errors are reserved for unknown providers and store failures before a
    /// run starts. Everything that happens inside a run is reported through
    /// the returned [`RefreshOutcome`].
    pub async fn trigger(
        self: &Arc<Self>,
        request: RefreshRequest,
    ) -> Result<RefreshOutcome, RefreshError> {
        let provider = self.provider(&request.provider)?.clone();

        if !request.force {
            if let Some(current) = self.store.current(&provider.id).await? {
                let age = current.age(Utc::now());
                if age < self.policy.freshness_window {
                    tracing::debug!(
                        provider = %provider.id,
                        age_secs = age.num_seconds(),
                        "snapshot still fresh, skipping refresh"
                    );
                    self.events.emit(RefreshEvent::RefreshSkipped {
                        provider: provider.id.clone(),
                        reason: SkipReason::Fresh,
                    });
                    return Ok(RefreshOutcome::AcceptedWithSnapshot {
                        job_id: None,
                        snapshot: current,
                        refreshed: false,
                    });
                }
            }
        }

        let job_id = Uuid::new_v4().to_string();
        let lease = self
            .store
            .acquire_lease(&provider.id, &job_id, self.policy.lease_ttl)
            .await?;
        if lease.is_none() {
            let holder = match self.store.lease(&provider.id).await {
                Ok(lease) => lease.map(|l| l.job_id),
                Err(e) => {
                    tracing::debug!(provider = %provider.id, "lease lookup failed: {e}");
                    None
                }
            };
            tracing::info!(provider = %provider.id, holder = ?holder, "refresh already running");
            self.events.emit(RefreshEvent::RefreshSkipped {
                provider: provider.id.clone(),
                reason: SkipReason::AlreadyRunning,
            });
            return Ok(RefreshOutcome::AlreadyRunning { job_id: holder });
        }

        tracing::info!(
            provider = %provider.id,
            job_id = %job_id,
            force = request.force,
            background = !request.wait,
            "refresh started"
        );
        self.events.emit(RefreshEvent::RefreshStarted {
            provider: provider.id.clone(),
            job_id: job_id.clone(),
            forced: request.force,
            background: !request.wait,
        });
        self.stage(&provider.id, &job_id, RefreshStage::Locked);

        if request.wait {
            return Ok(self.run_locked(provider, job_id).await);
        }

        let this = Arc::clone(self);
        let background_job = job_id.clone();
        self.tasks
            .spawn(async move {
                this.run_locked(provider, background_job).await;
            })
            .await;
        Ok(RefreshOutcome::AcceptedAsync { job_id })
    }

    /// Trigger a background refresh of every provider.
    pub async fn refresh_all(
        self: &Arc<Self>,
        force: bool,
    ) -> Vec<(String, Result<RefreshOutcome, RefreshError>)> {
        let mut results = Vec::with_capacity(self.registry.len());
        for id in self.registry.ids() {
            let outcome = self
                .trigger(RefreshRequest::new(id.clone()).force(force))
                .await;
            results.push((id, outcome));
        }
        results
    }

    /// Background runs spawned and not yet reaped.
    pub async fn in_flight(&self) -> usize {
        self.tasks.pending().await
    }

    /// Wait for every background run to finish.
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await;
    }

    /// Drain background runs, then release the acquirer's resources.
    pub async fn shutdown(&self) {
        self.wait_idle().await;
        self.acquirer.shutdown().await;
    }

    /// Best data available for a provider, never failing on store trouble.
    pub async fn read_best_effort(&self, provider: &str) -> Result<BestEffort, RefreshError> {
        let descriptor = self.provider(provider)?;
        Ok(store::read_best_effort(
            self.store.as_ref(),
            &descriptor.id,
            descriptor.default_data.as_ref(),
            Utc::now().date_naive(),
        )
        .await)
    }

    /// Run the pipeline under an already-held lease, then release it.
    async fn run_locked(&self, provider: ProviderDescriptor, job_id: String) -> RefreshOutcome {
        let started = Instant::now();
        // a panicking stage must not skip the release below
        let result = AssertUnwindSafe(self.run_pipeline(&provider, &job_id, started))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(RefreshError::Panicked {
                    provider: provider.id.clone(),
                    message: panic_message(panic.as_ref()),
                })
            });

        match self.store.release_lease(&provider.id, &job_id).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                provider = %provider.id,
                job_id = %job_id,
                "lease was gone at release (expired mid-run?)"
            ),
            Err(e) => tracing::error!(
                provider = %provider.id,
                job_id = %job_id,
                "lease release failed, it will expire on its own: {e}"
            ),
        }
        self.stage(&provider.id, &job_id, RefreshStage::Idle);

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::error!(
                    provider = %provider.id,
                    job_id = %job_id,
                    kind = ?e.kind(),
                    elapsed_ms,
                    "refresh failed: {e}"
                );
                self.events.emit(RefreshEvent::RefreshFailed {
                    provider: provider.id.clone(),
                    job_id: job_id.clone(),
                    kind: e.kind(),
                    error: e.to_string(),
                    elapsed_ms,
                });
                RefreshOutcome::Failed {
                    job_id,
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        provider: &ProviderDescriptor,
        job_id: &str,
        started: Instant,
    ) -> Result<RefreshOutcome, RefreshError> {
        self.stage(&provider.id, job_id, RefreshStage::Acquiring);
        let pages = self.acquirer.acquire(provider).await?;
        for page in &pages {
            self.events.emit(RefreshEvent::PageAcquired {
                provider: provider.id.clone(),
                url: page.url.clone(),
                via: page.acquired_via,
                chars: page.text.len(),
                error: page.error.clone(),
            });
        }
        if !pages.iter().any(|p| p.is_usable()) {
            return Err(RefreshError::AcquisitionTotalFailure {
                provider: provider.id.clone(),
                pages: pages.len(),
            });
        }

        self.stage(&provider.id, job_id, RefreshStage::Extracting);
        let request = ExtractionRequest::from_pages(&provider.name, &pages);
        let extraction = self.extractor.extract(&request).await?;

        self.stage(&provider.id, job_id, RefreshStage::Validating);
        let previous = self.store.current(&provider.id).await?;
        let validation = self.evaluator.evaluate(&EvaluationInput {
            provider: &provider.id,
            data: &extraction.data,
            extraction_confidence: extraction.confidence,
            previous: previous.as_ref(),
            expected_keywords: &provider.expected_keywords,
        });

        if !validation.accepted {
            self.stage(&provider.id, job_id, RefreshStage::Rejected);
            let record = FailureRecord {
                provider: provider.id.clone(),
                job_id: job_id.to_string(),
                recorded_at: Utc::now(),
                validation: validation.clone(),
                candidate: extraction.data,
                extraction_model: extraction.method,
            };
            self.store.record_failure(&provider.id, &record).await?;
            tracing::warn!(
                provider = %provider.id,
                job_id,
                confidence = validation.confidence,
                errors = ?validation.errors,
                "candidate rejected, keeping current snapshot"
            );
            self.events.emit(RefreshEvent::RefreshRejected {
                provider: provider.id.clone(),
                job_id: job_id.to_string(),
                confidence: validation.confidence,
                errors: validation.errors.clone(),
            });
            return Ok(RefreshOutcome::RejectedStaleKept {
                job_id: job_id.to_string(),
                validation,
                kept: previous,
            });
        }

        self.stage(&provider.id, job_id, RefreshStage::Committing);
        let snapshot = PricingSnapshot {
            provider: provider.id.clone(),
            scraped_at: Utc::now(),
            sources: pages
                .iter()
                .filter(|p| p.is_usable())
                .map(SourceDescriptor::from)
                .collect(),
            data: extraction.data,
            metadata: SnapshotMetadata {
                confidence: validation.confidence,
                extraction_model: extraction.method,
                processing_time: started.elapsed().as_millis() as u64,
                schema_version: SCHEMA_VERSION.to_string(),
            },
        };
        self.store.commit(&provider.id, &snapshot).await?;

        for warning in &validation.warnings {
            tracing::info!(provider = %provider.id, "validation warning: {warning}");
        }
        tracing::info!(
            provider = %provider.id,
            job_id,
            confidence = validation.confidence,
            sources = snapshot.sources.len(),
            elapsed_ms = snapshot.metadata.processing_time,
            "snapshot committed"
        );
        self.events.emit(RefreshEvent::RefreshAccepted {
            provider: provider.id.clone(),
            job_id: job_id.to_string(),
            confidence: validation.confidence,
            warnings: validation.warnings.len(),
            elapsed_ms: snapshot.metadata.processing_time,
        });
        Ok(RefreshOutcome::AcceptedWithSnapshot {
            job_id: Some(job_id.to_string()),
            snapshot,
            refreshed: true,
        })
    }

    fn stage(&self, provider: &str, job_id: &str, stage: RefreshStage) {
        tracing::debug!(provider, job_id, ?stage, "stage");
        self.events.emit(RefreshEvent::StageChanged {
            provider: provider.to_string(),
            job_id: job_id.to_string(),
            stage,
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
