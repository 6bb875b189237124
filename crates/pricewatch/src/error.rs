//! Error taxonomy for the refresh pipeline.
//!
//! Page-level acquisition failures never surface here: they are recorded
//! inline on [`crate::PageSnapshot::error`]. Validation rejection and lease
//! contention are normal outcomes, not errors.

use serde::{Deserialize, Serialize};

/// Acquisition could not be attempted for a provider.
#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("rendering engine not available: {0}")]
    RendererUnavailable(String),

    #[error("page {url} failed: {reason}")]
    Page { url: String, reason: String },
}

/// The extraction boundary returned nothing usable.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("extraction returned an empty result")]
    Empty,

    #[error("extraction returned malformed data: {0}")]
    Malformed(String),

    #[error("extraction transport error: {0}")]
    Transport(String),

    #[error("extraction backend responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no usable page content to extract from")]
    NoContent,
}

/// A store read or write failed.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A refresh attempt failed as a fault (as opposed to a rejection).
#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("no usable page for provider {provider} ({pages} attempted)")]
    AcquisitionTotalFailure { provider: String, pages: usize },

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("refresh of {provider} panicked: {message}")]
    Panicked { provider: String, message: String },
}

impl RefreshError {
    /// Fault category used for alerting.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownProvider(_) => FailureKind::Configuration,
            Self::AcquisitionTotalFailure { .. } | Self::Acquisition(_) => FailureKind::Acquisition,
            Self::Extraction(_) => FailureKind::Extraction,
            Self::Store(_) => FailureKind::Storage,
            Self::Panicked { .. } => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Acquisition,
    Extraction,
    Storage,
    /// A pipeline stage panicked.
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_error_kinds() {
        let e = RefreshError::AcquisitionTotalFailure {
            provider: "render".into(),
            pages: 2,
        };
        assert_eq!(e.kind(), FailureKind::Acquisition);
        assert_eq!(
            RefreshError::from(ExtractionError::Empty).kind(),
            FailureKind::Extraction
        );
        assert_eq!(
            RefreshError::from(StoreError::Backend("locked".into())).kind(),
            FailureKind::Storage
        );
        let e = RefreshError::Panicked {
            provider: "acme".into(),
            message: "boom".into(),
        };
        assert_eq!(e.kind(), FailureKind::Internal);
        assert_eq!(e.to_string(), "refresh of acme panicked: boom");
    }

    #[test]
    fn test_transparent_messages() {
        let e = RefreshError::from(ExtractionError::Status {
            status: 502,
            body: "bad gateway".into(),
        });
        assert_eq!(e.to_string(), "extraction backend responded 502: bad gateway");
    }
}
