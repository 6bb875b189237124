//! Pricewatch — core library for pricing snapshots, refresh leases, and confidence evaluation.

pub mod error;
pub mod evaluator;
pub mod types;
pub mod walk;

pub use error::{
    AcquisitionError, ExtractionError, FailureKind, RefreshError, StoreError, StoreResult,
};
pub use evaluator::{ConfidenceEvaluator, EvaluationInput, ACCEPT_THRESHOLD};
pub use types::*;
