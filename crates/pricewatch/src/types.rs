//! Core data types for page captures, pricing snapshots, and refresh bookkeeping.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version tag stamped into every stored snapshot.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// How long a rejected attempt stays readable as the provider's last failure.
pub const FAILURE_RETENTION_DAYS: i64 = 30;

/// What kind of content a source page carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageType {
    Pricing,
    Limits,
    FairUse,
    Docs,
}

impl PageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pricing => "pricing",
            Self::Limits => "limits",
            Self::FairUse => "fair-use",
            Self::Docs => "docs",
        }
    }

    /// Infer the page type from its URL, falling back to the page text.
    pub fn infer(url: &str, text: &str) -> Self {
        let url = url.to_ascii_lowercase();
        if ["fair-use", "fair_use", "fairuse", "acceptable-use"]
            .iter()
            .any(|m| url.contains(m))
        {
            return Self::FairUse;
        }
        if ["limit", "quota"].iter().any(|m| url.contains(m)) {
            return Self::Limits;
        }
        if ["pricing", "plans", "price"].iter().any(|m| url.contains(m)) {
            return Self::Pricing;
        }
        if url.contains("/docs") || url.contains("://docs.") || url.contains("documentation") {
            return Self::Docs;
        }

        let head: String = text.chars().take(2_000).collect::<String>().to_lowercase();
        if head.contains("fair use") || head.contains("acceptable use") {
            Self::FairUse
        } else if head.contains("rate limit") || head.contains("quota") {
            Self::Limits
        } else {
            Self::Pricing
        }
    }
}

/// Which path produced a page capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMethod {
    Http,
    Browser,
}

/// One URL's acquisition result.
///
/// A failed page is still a `PageSnapshot`: content is empty and `error` says why.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
    pub text: String,
    pub title: Option<String>,
    /// Full-page PNG capture; only the browser path produces one.
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub captured_at: DateTime<Utc>,
    pub acquired_via: AcquisitionMethod,
    pub error: Option<String>,
}

impl PageSnapshot {
    /// A page that could not be acquired.
    pub fn failed(url: &str, via: AcquisitionMethod, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            html: String::new(),
            text: String::new(),
            title: None,
            screenshot: None,
            page_type: PageType::infer(url, ""),
            captured_at: Utc::now(),
            acquired_via: via,
            error: Some(error.into()),
        }
    }

    /// Whether this page carries content worth sending to extraction.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && !self.text.trim().is_empty()
    }
}

/// Result returned by the extraction boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// Schema-less structured document.
    pub data: Value,
    /// Extraction-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Identifier of the model or method that produced `data`.
    pub method: String,
    /// Usage counter reported by the backend (tokens or cost units).
    pub usage: u64,
}

/// The evaluator layers, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLayer {
    Core,
    Provider,
    Statistical,
    Semantic,
}

/// Score contributed by a single layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerScore {
    pub layer: ValidationLayer,
    pub passed: bool,
    pub score: f64,
}

/// The evaluator's verdict on one candidate document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub confidence: f64,
    /// Hard errors; any entry means rejection.
    pub errors: Vec<String>,
    /// Soft warnings; informational only.
    pub warnings: Vec<String>,
    pub layers: Vec<LayerScore>,
}

/// Where a snapshot's content came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub url: String,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub scraped_at: DateTime<Utc>,
}

impl From<&PageSnapshot> for SourceDescriptor {
    fn from(page: &PageSnapshot) -> Self {
        Self {
            url: page.url.clone(),
            page_type: page.page_type,
            scraped_at: page.captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub confidence: f64,
    pub extraction_model: String,
    /// Wall-clock duration of the refresh attempt in milliseconds.
    pub processing_time: u64,
    pub schema_version: String,
}

/// The durable, accepted unit of pricing data for one provider.
///
/// The serialized shape is consumed verbatim by the serving layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSnapshot {
    pub provider: String,
    pub scraped_at: DateTime<Utc>,
    pub sources: Vec<SourceDescriptor>,
    pub data: Value,
    pub metadata: SnapshotMetadata,
}

impl PricingSnapshot {
    /// Age of the snapshot relative to `now`. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.scraped_at).max(Duration::zero())
    }

    /// Calendar day this snapshot is archived under.
    pub fn archive_date(&self) -> NaiveDate {
        self.scraped_at.date_naive()
    }
}

/// Short-lived mutual exclusion record for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub provider: String,
    pub job_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(provider: &str, job_id: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            provider: provider.to_string(),
            job_id: job_id.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// An expired lease is equivalent to no lease at all.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Last rejected attempt for a provider, kept for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub provider: String,
    pub job_id: String,
    pub recorded_at: DateTime<Utc>,
    pub validation: ValidationOutcome,
    /// The rejected candidate document. Never promoted to current.
    pub candidate: Value,
    pub extraction_model: String,
}

impl FailureRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.recorded_at > Duration::days(FAILURE_RETENTION_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_at(ts: DateTime<Utc>) -> PricingSnapshot {
        PricingSnapshot {
            provider: "vercel".into(),
            scraped_at: ts,
            sources: vec![SourceDescriptor {
                url: "https://vercel.com/pricing".into(),
                page_type: PageType::Pricing,
                scraped_at: ts,
            }],
            data: json!({"tiers": []}),
            metadata: SnapshotMetadata {
                confidence: 0.9,
                extraction_model: "test-model".into(),
                processing_time: 1200,
                schema_version: SCHEMA_VERSION.into(),
            },
        }
    }

    #[test]
    fn test_page_type_from_url() {
        assert_eq!(
            PageType::infer("https://example.com/pricing", ""),
            PageType::Pricing
        );
        assert_eq!(
            PageType::infer("https://example.com/legal/fair-use", ""),
            PageType::FairUse
        );
        assert_eq!(
            PageType::infer("https://example.com/docs/rate-limits", ""),
            PageType::Limits
        );
        assert_eq!(
            PageType::infer("https://docs.example.com/getting-started", ""),
            PageType::Docs
        );
    }

    #[test]
    fn test_page_type_falls_back_to_text() {
        assert_eq!(
            PageType::infer("https://example.com/terms", "Our Fair Use policy says"),
            PageType::FairUse
        );
        assert_eq!(
            PageType::infer("https://example.com/x", "Plans start at $5"),
            PageType::Pricing
        );
    }

    #[test]
    fn test_page_type_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(PageType::FairUse).unwrap(),
            json!("fair-use")
        );
    }

    #[test]
    fn test_snapshot_wire_field_names() {
        let ts = Utc::now();
        let value = serde_json::to_value(snapshot_at(ts)).unwrap();
        assert!(value.get("scrapedAt").is_some());
        assert_eq!(value["sources"][0]["type"], json!("pricing"));
        assert!(value["sources"][0].get("scrapedAt").is_some());
        assert_eq!(value["metadata"]["extractionModel"], json!("test-model"));
        assert_eq!(value["metadata"]["processingTime"], json!(1200));
        assert_eq!(value["metadata"]["schemaVersion"], json!("1.0.0"));
    }

    #[test]
    fn test_snapshot_age_is_never_negative() {
        let now = Utc::now();
        let future = snapshot_at(now + Duration::minutes(5));
        assert_eq!(future.age(now), Duration::zero());
        let past = snapshot_at(now - Duration::minutes(5));
        assert_eq!(past.age(now), Duration::minutes(5));
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = Lease::new("fly", "job-1", now, Duration::minutes(5));
        assert!(!lease.is_expired(now));
        assert!(!lease.is_expired(now + Duration::minutes(4)));
        assert!(lease.is_expired(now + Duration::minutes(5)));
    }

    #[test]
    fn test_failed_page_is_not_usable() {
        let page = PageSnapshot::failed("https://x.dev/pricing", AcquisitionMethod::Http, "timeout");
        assert!(!page.is_usable());
        assert_eq!(page.error.as_deref(), Some("timeout"));
        assert_eq!(page.page_type, PageType::Pricing);
    }
}
