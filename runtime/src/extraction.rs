//! The extraction boundary: page text in, schema-less pricing document out.
//!
//! The extractor itself (a model behind an HTTP endpoint) is external. This
//! module owns the request shape, the transport, and the normalization of
//! whatever comes back into an [`ExtractionOutcome`].

use async_trait::async_trait;
use pricewatch::{ExtractionError, ExtractionOutcome, PageSnapshot, PageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Per-page text cap sent to the extractor.
pub const MAX_PAGE_CHARS: usize = 40_000;

/// Confidence assumed when the backend does not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPage {
    pub url: String,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Display name of the provider.
    pub provider: String,
    pub pages: Vec<ExtractionPage>,
}

impl ExtractionRequest {
    /// Build a request from the usable pages only, each capped in length.
    pub fn from_pages(provider: &str, pages: &[PageSnapshot]) -> Self {
        Self {
            provider: provider.to_string(),
            pages: pages
                .iter()
                .filter(|p| p.is_usable())
                .map(|p| ExtractionPage {
                    url: p.url.clone(),
                    page_type: p.page_type,
                    text: p.text.chars().take(MAX_PAGE_CHARS).collect(),
                })
                .collect(),
        }
    }
}

/// Turns page text into a structured document.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest)
        -> Result<ExtractionOutcome, ExtractionError>;
}

/// Extractor reached over HTTP: POST the request as JSON, read back
/// `{data, confidence, model, usage}`.
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpExtractor {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout_ms: u64) -> Self {
        let timeout = Duration::from_millis(timeout_ms);
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("extraction client setup failed, using defaults: {e}");
                reqwest::Client::new()
            }
        };
        Self {
            client,
            endpoint: endpoint.into(),
            token,
            timeout,
        }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        if request.pages.is_empty() {
            return Err(ExtractionError::NoContent);
        }

        // per-request timeout holds even for a default-built client
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let outcome = parse_response(&body)?;
        tracing::debug!(
            provider = %request.provider,
            model = %outcome.method,
            confidence = outcome.confidence,
            usage = outcome.usage,
            "extraction returned"
        );
        Ok(outcome)
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    data: Value,
    confidence: Option<f64>,
    model: Option<String>,
    #[serde(default)]
    usage: Value,
}

/// Normalize a raw extractor response body.
pub fn parse_response(body: &str) -> Result<ExtractionOutcome, ExtractionError> {
    if body.trim().is_empty() {
        return Err(ExtractionError::Empty);
    }
    let raw: RawResponse =
        serde_json::from_str(body).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    let confidence = raw
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    Ok(ExtractionOutcome {
        data: parse_document(raw.data)?,
        confidence,
        method: raw
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        usage: usage_total(&raw.usage),
    })
}

/// Accept a document either as JSON or as a JSON string, possibly fenced.
///
/// An empty object passes here on purpose; judging content is the
/// evaluator's job.
pub fn parse_document(data: Value) -> Result<Value, ExtractionError> {
    match data {
        Value::Null => Err(ExtractionError::Empty),
        Value::String(s) => {
            let inner = strip_code_fence(&s);
            if inner.is_empty() {
                return Err(ExtractionError::Empty);
            }
            match serde_json::from_str::<Value>(inner) {
                Ok(Value::Null) => Err(ExtractionError::Empty),
                Ok(Value::String(_)) => Err(ExtractionError::Malformed(
                    "document is a bare string".to_string(),
                )),
                Ok(doc) => Ok(doc),
                Err(e) => Err(ExtractionError::Malformed(e.to_string())),
            }
        }
        doc => Ok(doc),
    }
}

fn strip_code_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string ("json") on the opening line
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Usage is a bare counter or an object of counters (`input_tokens`, ...).
fn usage_total(usage: &Value) -> u64 {
    match usage {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::Object(map) => map.values().filter_map(Value::as_u64).sum(),
        _ => 0,
    }
}
