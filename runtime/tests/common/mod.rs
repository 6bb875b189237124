//! Shared fakes for the refresh integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use pricewatch::{
    AcquisitionError, AcquisitionMethod, ExtractionError, ExtractionOutcome, FailureRecord, Lease,
    PageSnapshot, PageType, PricingSnapshot, SnapshotMetadata, SourceDescriptor, StoreError,
    StoreResult, SCHEMA_VERSION,
};
use pricewatch_runtime::acquisition::ContentAcquirer;
use pricewatch_runtime::coordinator::RefreshCoordinator;
use pricewatch_runtime::extraction::{ExtractionRequest, Extractor};
use pricewatch_runtime::registry::{
    ProviderCategory, ProviderDescriptor, ProviderRegistry, RenderHint,
};
use pricewatch_runtime::store::{MemoryStore, SnapshotStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

pub const PRICING_TEXT: &str = "Pricing. Free plan: $0 per month, includes 100 GB bandwidth. \
Pro plan: $20 per month per seat, includes 1 TB bandwidth and priority support.";

pub fn provider(id: &str, urls: &[&str]) -> ProviderDescriptor {
    ProviderDescriptor {
        id: id.to_string(),
        name: id.to_uppercase(),
        category: ProviderCategory::Hosting,
        urls: urls.iter().map(|u| u.to_string()).collect(),
        render: RenderHint::default(),
        expected_keywords: Vec::new(),
        default_data: None,
    }
}

pub fn registry(providers: Vec<ProviderDescriptor>) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(providers).unwrap())
}

pub fn page(url: &str, text: &str) -> PageSnapshot {
    PageSnapshot {
        url: url.to_string(),
        html: format!("<html><body><main>{text}</main></body></html>"),
        text: text.to_string(),
        title: Some("Pricing".to_string()),
        screenshot: None,
        page_type: PageType::Pricing,
        captured_at: Utc::now(),
        acquired_via: AcquisitionMethod::Http,
        error: None,
    }
}

pub fn failed_page(url: &str) -> PageSnapshot {
    PageSnapshot::failed(url, AcquisitionMethod::Http, "HTTP 503")
}

pub fn tiers(pro_price: f64) -> Value {
    json!({"tiers": [{"name": "Free", "price": 0}, {"name": "Pro", "price": pro_price}]})
}

/// A committed-looking snapshot scraped `age` ago.
pub fn snapshot(provider: &str, data: Value, age: Duration) -> PricingSnapshot {
    let scraped_at = Utc::now() - age;
    PricingSnapshot {
        provider: provider.to_string(),
        scraped_at,
        sources: vec![SourceDescriptor {
            url: format!("https://{provider}.example.com/pricing"),
            page_type: PageType::Pricing,
            scraped_at,
        }],
        data,
        metadata: SnapshotMetadata {
            confidence: 0.85,
            extraction_model: "test-model".to_string(),
            processing_time: 12,
            schema_version: SCHEMA_VERSION.to_string(),
        },
    }
}

/// Acquirer returning a fixed page list, optionally held behind a gate.
pub struct ScriptedAcquirer {
    pages: Mutex<Vec<PageSnapshot>>,
    fail: AtomicBool,
    panic_next: AtomicBool,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
    entered: Notify,
}

impl ScriptedAcquirer {
    pub fn new(pages: Vec<PageSnapshot>) -> Self {
        Self {
            pages: Mutex::new(pages),
            fail: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: None,
            entered: Notify::new(),
        }
    }

    /// Block every `acquire` until [`ScriptedAcquirer::open`] is called.
    pub fn gated(pages: Vec<PageSnapshot>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(pages)
        }
    }

    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_024);
        }
    }

    /// Resolves once some `acquire` call has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn set_pages(&self, pages: Vec<PageSnapshot>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub fn fail_with_renderer_unavailable(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Make the next `acquire` call panic.
    pub fn panic_next_call(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentAcquirer for ScriptedAcquirer {
    async fn acquire(
        &self,
        _provider: &ProviderDescriptor,
    ) -> Result<Vec<PageSnapshot>, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("renderer crashed mid-page");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AcquisitionError::RendererUnavailable(
                "chromium not found".to_string(),
            ));
        }
        Ok(self.pages.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Data { data: Value, confidence: f64 },
    Empty,
    Transport,
}

/// Extractor replaying a configured reply and recording what it was sent.
pub struct ScriptedExtractor {
    reply: Mutex<Reply>,
    requests: Mutex<Vec<ExtractionRequest>>,
}

impl ScriptedExtractor {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply: Mutex::new(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn data(data: Value, confidence: f64) -> Self {
        Self::new(Reply::Data { data, confidence })
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.reply.lock().unwrap().clone() {
            Reply::Data { data, confidence } => Ok(ExtractionOutcome {
                data,
                confidence,
                method: "scripted".to_string(),
                usage: 42,
            }),
            Reply::Empty => Err(ExtractionError::Empty),
            Reply::Transport => Err(ExtractionError::Transport(
                "connection refused".to_string(),
            )),
        }
    }
}

/// Memory store whose `commit` can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_commit: AtomicBool,
}

impl FlakyStore {
    pub fn fail_commits(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SnapshotStore for FlakyStore {
    async fn current(&self, provider: &str) -> StoreResult<Option<PricingSnapshot>> {
        self.inner.current(provider).await
    }

    async fn commit(&self, provider: &str, snapshot: &PricingSnapshot) -> StoreResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.commit(provider, snapshot).await
    }

    async fn archived(
        &self,
        provider: &str,
        date: NaiveDate,
    ) -> StoreResult<Option<PricingSnapshot>> {
        self.inner.archived(provider, date).await
    }

    async fn archived_dates(&self, provider: &str) -> StoreResult<Vec<NaiveDate>> {
        self.inner.archived_dates(provider).await
    }

    async fn record_failure(&self, provider: &str, record: &FailureRecord) -> StoreResult<()> {
        self.inner.record_failure(provider, record).await
    }

    async fn last_failure(&self, provider: &str) -> StoreResult<Option<FailureRecord>> {
        self.inner.last_failure(provider).await
    }

    async fn acquire_lease(
        &self,
        provider: &str,
        job_id: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Lease>> {
        self.inner.acquire_lease(provider, job_id, ttl).await
    }

    async fn release_lease(&self, provider: &str, job_id: &str) -> StoreResult<bool> {
        self.inner.release_lease(provider, job_id).await
    }

    async fn lease(&self, provider: &str) -> StoreResult<Option<Lease>> {
        self.inner.lease(provider).await
    }

    async fn purge_archive(&self, before: NaiveDate) -> StoreResult<usize> {
        self.inner.purge_archive(before).await
    }

    async fn sweep_expired(&self) -> StoreResult<usize> {
        self.inner.sweep_expired().await
    }
}

/// A coordinator over the given fakes.
pub struct Harness {
    pub coordinator: Arc<RefreshCoordinator>,
    pub acquirer: Arc<ScriptedAcquirer>,
    pub extractor: Arc<ScriptedExtractor>,
    pub store: Arc<dyn SnapshotStore>,
}

impl Harness {
    pub fn new(
        providers: Vec<ProviderDescriptor>,
        acquirer: ScriptedAcquirer,
        extractor: ScriptedExtractor,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let acquirer = Arc::new(acquirer);
        let extractor = Arc::new(extractor);
        let coordinator = Arc::new(RefreshCoordinator::new(
            registry(providers),
            Arc::clone(&acquirer) as Arc<dyn ContentAcquirer>,
            Arc::clone(&extractor) as Arc<dyn Extractor>,
            Arc::clone(&store),
        ));
        Self {
            coordinator,
            acquirer,
            extractor,
            store,
        }
    }

    /// One provider "acme" with one URL serving pricing text, extraction
    /// returning two tiers at confidence 0.9.
    pub fn simple() -> Self {
        Self::new(
            vec![provider("acme", &["https://acme.example.com/pricing"])],
            ScriptedAcquirer::new(vec![page("https://acme.example.com/pricing", PRICING_TEXT)]),
            ScriptedExtractor::data(tiers(20.0), 0.9),
            Arc::new(MemoryStore::new()),
        )
    }
}
