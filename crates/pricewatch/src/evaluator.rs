//! Confidence evaluation over extracted pricing documents.
//!
//! Four layers run in a fixed order:
//!
//! 1. **Core** (hard) — the document is non-trivial and talks about pricing or limits.
//!    A failure here rejects immediately.
//! 2. **Provider** (soft) — provider-registered keywords are present.
//! 3. **Statistical** (soft) — size and price movement against the previous snapshot.
//! 4. **Semantic** — implausible or duplicated values. Negative prices are hard errors.
//!
//! The layer scores are averaged and then averaged again with the extraction
//! backend's own confidence. The evaluator is pure: no I/O, no clock.

use crate::types::{LayerScore, PricingSnapshot, ValidationLayer, ValidationOutcome};
use crate::walk::{self, PriceValue};
use serde_json::Value;
use std::collections::HashMap;

/// Final confidence must exceed this for a candidate to be accepted.
pub const ACCEPT_THRESHOLD: f64 = 0.5;

/// Documents smaller than this (serialized) are treated as trivial.
pub const MIN_DOCUMENT_BYTES: usize = 20;

/// Relative serialized-size change that triggers a warning.
pub const SIZE_CHANGE_THRESHOLD: f64 = 0.5;

/// Relative change between matched prices that triggers a warning.
pub const PRICE_CHANGE_THRESHOLD: f64 = 0.5;

/// New and previous prices are only compared when within this relative distance.
pub const PRICE_MATCH_TOLERANCE: f64 = 2.0;

/// Prices above this are flagged as implausible.
pub const MAX_PLAUSIBLE_PRICE: f64 = 1_000_000.0;

/// Identical prices further apart than this (serialized characters) look duplicated.
pub const DUPLICATE_DISTANCE: usize = 1_000;

const PRICING_SIGNALS: &[&str] = &[
    "price", "pricing", "cost", "tier", "plan", "free", "pro", "enterprise", "starter",
    "premium", "basic", "monthly", "yearly", "annual", "billing", "subscription", "usd", "eur",
    "$", "\u{20AC}", "\u{00A3}", "/mo",
];

const LIMIT_SIGNALS: &[&str] = &[
    "limit", "quota", "request", "bandwidth", "storage", "feature", "concurren", "seat",
    "usage", "included", "egress",
];

const CORE_SCORE: (f64, f64) = (1.0, 0.0);
const PROVIDER_SCORE: (f64, f64) = (0.8, 0.0);
const STATISTICAL_SCORE: (f64, f64) = (0.7, 0.5);
const SEMANTIC_SCORE: (f64, f64) = (0.9, 0.5);

/// Everything the evaluator looks at for one candidate.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub provider: &'a str,
    pub data: &'a Value,
    pub extraction_confidence: f64,
    pub previous: Option<&'a PricingSnapshot>,
    pub expected_keywords: &'a [String],
}

#[derive(Debug, Default)]
struct LayerReport {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl LayerReport {
    fn passed(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Layered confidence evaluator.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceEvaluator {
    threshold: f64,
}

impl Default for ConfidenceEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfidenceEvaluator {
    pub fn new() -> Self {
        Self {
            threshold: ACCEPT_THRESHOLD,
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold: clamp_unit(threshold),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluate a candidate document.
    pub fn evaluate(&self, input: &EvaluationInput<'_>) -> ValidationOutcome {
        let extraction = clamp_unit(input.extraction_confidence);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut layers = Vec::with_capacity(4);

        let terms = walk::terms(input.data);

        let core = check_core(input.data, &terms);
        let core_passed = core.errors.is_empty();
        layers.push(score(ValidationLayer::Core, core_passed, CORE_SCORE));
        errors.extend(core.errors);

        if !core_passed {
            let confidence = mean(&[CORE_SCORE.1, extraction]);
            tracing::debug!(
                provider = input.provider,
                confidence,
                "core check failed, skipping remaining layers"
            );
            return ValidationOutcome {
                accepted: false,
                confidence,
                errors,
                warnings,
                layers,
            };
        }

        let prices = walk::price_values(input.data);

        let provider = check_provider(&terms, input.expected_keywords);
        let statistical = check_statistical(input.data, &prices, input.previous);
        let semantic = check_semantic(&prices);

        for (layer, report, weights) in [
            (ValidationLayer::Provider, provider, PROVIDER_SCORE),
            (ValidationLayer::Statistical, statistical, STATISTICAL_SCORE),
            (ValidationLayer::Semantic, semantic, SEMANTIC_SCORE),
        ] {
            layers.push(score(layer, report.passed(), weights));
            errors.extend(report.errors);
            warnings.extend(report.warnings);
        }

        let pipeline = mean(&layers.iter().map(|l| l.score).collect::<Vec<_>>());
        let confidence = clamp_unit(mean(&[pipeline, extraction]));
        let accepted = errors.is_empty() && confidence > self.threshold;

        tracing::debug!(
            provider = input.provider,
            confidence,
            accepted,
            errors = errors.len(),
            warnings = warnings.len(),
            "evaluated candidate"
        );

        ValidationOutcome {
            accepted,
            confidence,
            errors,
            warnings,
            layers,
        }
    }
}

fn score(layer: ValidationLayer, passed: bool, (pass, fail): (f64, f64)) -> LayerScore {
    LayerScore {
        layer,
        passed,
        score: if passed { pass } else { fail },
    }
}

fn check_core(data: &Value, terms: &[String]) -> LayerReport {
    let mut report = LayerReport::default();

    let empty = match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    };
    if empty {
        report.errors.push("extracted document is empty".to_string());
        return report;
    }

    let size = walk::serialized_len(data);
    if size < MIN_DOCUMENT_BYTES {
        report.errors.push(format!(
            "extracted document is too small ({size} bytes, minimum {MIN_DOCUMENT_BYTES})"
        ));
    }

    let has_pricing = PRICING_SIGNALS.iter().any(|s| walk::mentions(terms, s));
    let has_limits = LIMIT_SIGNALS.iter().any(|s| walk::mentions(terms, s));
    if !has_pricing && !has_limits {
        report
            .errors
            .push("no pricing or limits vocabulary found in document".to_string());
    }

    report
}

fn check_provider(terms: &[String], expected: &[String]) -> LayerReport {
    let mut report = LayerReport::default();
    for keyword in expected {
        if !walk::mentions(terms, keyword) {
            report
                .warnings
                .push(format!("expected keyword missing: {keyword}"));
        }
    }
    report
}

fn check_statistical(
    data: &Value,
    prices: &[PriceValue],
    previous: Option<&PricingSnapshot>,
) -> LayerReport {
    let mut report = LayerReport::default();
    let Some(previous) = previous else {
        return report;
    };

    let old_size = walk::serialized_len(&previous.data);
    let new_size = walk::serialized_len(data);
    if old_size > 0 {
        let change = (new_size as f64 - old_size as f64).abs() / old_size as f64;
        if change > SIZE_CHANGE_THRESHOLD {
            report.warnings.push(format!(
                "document size changed by {:.0}% ({old_size} -> {new_size} bytes)",
                change * 100.0
            ));
        }
    }

    let old_prices: Vec<f64> = walk::price_values(&previous.data)
        .into_iter()
        .map(|p| p.value)
        .collect();
    if old_prices.is_empty() {
        return report;
    }

    let mut flagged: Vec<(f64, f64)> = Vec::new();
    for new in prices.iter().map(|p| p.value) {
        let Some(old) = closest(&old_prices, new) else {
            continue;
        };
        if old == 0.0 {
            continue;
        }
        let change = (new - old).abs() / old.abs();
        if change > PRICE_MATCH_TOLERANCE || change <= PRICE_CHANGE_THRESHOLD {
            continue;
        }
        if flagged.contains(&(old, new)) {
            continue;
        }
        flagged.push((old, new));
        report.warnings.push(format!(
            "price changed from {old} to {new} ({:+.0}%)",
            (new - old) / old.abs() * 100.0
        ));
    }

    report
}

fn check_semantic(prices: &[PriceValue]) -> LayerReport {
    let mut report = LayerReport::default();

    for p in prices {
        if p.value < 0.0 {
            report
                .errors
                .push(format!("negative price found: {}", p.value));
        } else if p.value > MAX_PLAUSIBLE_PRICE {
            report
                .warnings
                .push(format!("implausibly large price found: {}", p.value));
        }
    }

    // value bits -> (first offset, last offset)
    let mut spans: HashMap<u64, (f64, usize, usize)> = HashMap::new();
    for p in prices.iter().filter(|p| p.value != 0.0) {
        spans
            .entry(p.value.to_bits())
            .and_modify(|(_, first, last)| {
                *first = (*first).min(p.offset);
                *last = (*last).max(p.offset);
            })
            .or_insert((p.value, p.offset, p.offset));
    }
    let mut duplicates: Vec<(f64, usize)> = spans
        .into_values()
        .filter(|(_, first, last)| last - first > DUPLICATE_DISTANCE)
        .map(|(value, first, last)| (value, last - first))
        .collect();
    duplicates.sort_by(|a, b| a.0.total_cmp(&b.0));
    for (value, distance) in duplicates {
        report.warnings.push(format!(
            "price {value} appears duplicated {distance} characters apart"
        ));
    }

    report
}

fn closest(values: &[f64], target: f64) -> Option<f64> {
    values
        .iter()
        .copied()
        .min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PageType, SnapshotMetadata, SourceDescriptor, SCHEMA_VERSION};
    use chrono::Utc;
    use serde_json::json;

    fn previous(data: Value) -> PricingSnapshot {
        let now = Utc::now();
        PricingSnapshot {
            provider: "acme".into(),
            scraped_at: now,
            sources: vec![SourceDescriptor {
                url: "https://acme.dev/pricing".into(),
                page_type: PageType::Pricing,
                scraped_at: now,
            }],
            data,
            metadata: SnapshotMetadata {
                confidence: 0.8,
                extraction_model: "test".into(),
                processing_time: 10,
                schema_version: SCHEMA_VERSION.into(),
            },
        }
    }

    fn evaluate(
        data: &Value,
        confidence: f64,
        prev: Option<&PricingSnapshot>,
        expected: &[String],
    ) -> ValidationOutcome {
        ConfidenceEvaluator::new().evaluate(&EvaluationInput {
            provider: "acme",
            data,
            extraction_confidence: confidence,
            previous: prev,
            expected_keywords: expected,
        })
    }

    fn tiers(pro_price: f64) -> Value {
        json!({"tiers": [{"name": "Free", "price": 0}, {"name": "Pro", "price": pro_price}]})
    }

    #[test]
    fn test_valid_tiers_accepted() {
        let outcome = evaluate(&tiers(20.0), 0.9, None, &[]);
        assert!(outcome.accepted);
        assert!(outcome.errors.is_empty());
        assert!(outcome.warnings.is_empty());
        // (1.0 + 0.8 + 0.7 + 0.9) / 4 = 0.85, mean with 0.9
        assert!((outcome.confidence - 0.875).abs() < 1e-9);
        assert_eq!(outcome.layers.len(), 4);
    }

    #[test]
    fn test_empty_document_rejected_at_core() {
        let outcome = evaluate(&json!({}), 0.95, None, &[]);
        assert!(!outcome.accepted);
        assert!(!outcome.errors.is_empty());
        assert_eq!(outcome.layers.len(), 1);
        assert_eq!(outcome.layers[0].layer, ValidationLayer::Core);
        assert!(!outcome.layers[0].passed);
    }

    #[test]
    fn test_document_without_vocabulary_rejected() {
        let doc = json!({"headline": "Welcome to our blog", "author": "someone"});
        let outcome = evaluate(&doc, 1.0, None, &[]);
        assert!(!outcome.accepted);
        assert!(outcome.errors.iter().any(|e| e.contains("vocabulary")));
    }

    #[test]
    fn test_limits_only_document_passes_core() {
        let doc = json!({"limits": {"requests_per_minute": 600, "storage_gb": 10}});
        let outcome = evaluate(&doc, 0.8, None, &[]);
        assert!(outcome.accepted);
    }

    #[test]
    fn test_large_price_change_warns_but_accepts() {
        let prev = previous(tiers(20.0));
        let outcome = evaluate(&tiers(45.0), 0.9, Some(&prev), &[]);
        assert!(outcome.accepted);
        assert!(outcome.warnings.iter().any(|w| w.contains("from 20 to 45")));
        let stat = outcome
            .layers
            .iter()
            .find(|l| l.layer == ValidationLayer::Statistical)
            .unwrap();
        assert!(!stat.passed);
        assert_eq!(stat.score, 0.5);
    }

    #[test]
    fn test_unmatched_new_price_not_penalized() {
        let prev = previous(tiers(20.0));
        // 500 is far outside the tolerance band of 20
        let outcome = evaluate(&tiers(500.0), 0.9, Some(&prev), &[]);
        assert!(!outcome.warnings.iter().any(|w| w.contains("price changed")));
    }

    #[test]
    fn test_small_price_change_is_quiet() {
        let prev = previous(tiers(20.0));
        let outcome = evaluate(&tiers(25.0), 0.9, Some(&prev), &[]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_size_change_warns() {
        let prev = previous(tiers(20.0));
        let bigger = json!({
            "tiers": [{"name": "Free", "price": 0}, {"name": "Pro", "price": 20}],
            "notes": "Includes unlimited projects, preview deployments, analytics, and priority support for every team member",
        });
        let outcome = evaluate(&bigger, 0.9, Some(&prev), &[]);
        assert!(outcome.accepted);
        assert!(outcome.warnings.iter().any(|w| w.contains("size changed")));
    }

    #[test]
    fn test_negative_price_rejects() {
        let outcome = evaluate(&tiers(-5.0), 1.0, None, &[]);
        assert!(!outcome.accepted);
        assert!(outcome.errors.iter().any(|e| e.contains("negative")));
    }

    #[test]
    fn test_huge_price_warns() {
        let outcome = evaluate(&tiers(5_000_000.0), 0.9, None, &[]);
        assert!(outcome.accepted);
        assert!(outcome.warnings.iter().any(|w| w.contains("implausibly large")));
    }

    #[test]
    fn test_distant_duplicate_warns() {
        let filler = "x".repeat(1_200);
        let doc = json!({
            "a_plan": {"name": "Pro", "price": 99},
            "b_notes": filler,
            "c_plan": {"name": "Pro again", "price": 99},
        });
        let outcome = evaluate(&doc, 0.9, None, &[]);
        assert!(outcome.warnings.iter().any(|w| w.contains("duplicated")));
    }

    #[test]
    fn test_missing_provider_keyword_is_soft() {
        let expected = vec!["Hobby".to_string(), "Pro".to_string()];
        let outcome = evaluate(&tiers(20.0), 0.9, None, &expected);
        assert!(outcome.accepted);
        assert_eq!(outcome.warnings, vec!["expected keyword missing: Hobby".to_string()]);
    }

    #[test]
    fn test_low_extraction_confidence_can_reject() {
        let expected = vec!["Hobby".to_string()];
        let prev = previous(tiers(20.0));
        // provider 0, statistical 0.5, semantic 0.9 -> pipeline 0.6; mean with 0.0 -> 0.3
        let outcome = evaluate(&tiers(45.0), 0.0, Some(&prev), &expected);
        assert!(outcome.errors.is_empty());
        assert!(!outcome.accepted);
        assert!((outcome.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_always_in_unit_interval() {
        let docs = [
            json!(null),
            json!({}),
            json!([]),
            json!("plan"),
            tiers(20.0),
            tiers(-1.0),
            tiers(1e12),
            json!({"quota": 1}),
        ];
        let prev = previous(tiers(10.0));
        for doc in &docs {
            for conf in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -3.0, 0.0, 0.5, 1.0, 7.0] {
                for p in [None, Some(&prev)] {
                    let outcome = evaluate(doc, conf, p, &["missing".to_string()]);
                    assert!(
                        (0.0..=1.0).contains(&outcome.confidence),
                        "confidence {} out of range for {doc} @ {conf}",
                        outcome.confidence
                    );
                }
            }
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let evaluator = ConfidenceEvaluator::with_threshold(0.875);
        let outcome = evaluator.evaluate(&EvaluationInput {
            provider: "acme",
            data: &tiers(20.0),
            extraction_confidence: 0.9,
            previous: None,
            expected_keywords: &[],
        });
        assert!(!outcome.accepted);
    }
}
