use std::time::Duration;

use thiserror::Error;

use crate::capture::CaptureError;

/// Every way an analysis can end without a report. The `Display` output is
/// what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("{0}")]
    NotReady(String),
    #[error("analysis cancelled")]
    Cancelled,
    #[error(
        "The analysis did not finish within {} seconds. Please try again.",
        .0.as_secs()
    )]
    Timeout(Duration),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    Upstream(String),
    #[error("Capturing the map failed: {0}")]
    Capture(String),
}

impl AnalysisError {
    /// Cancellations are never shown as a failure.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotReady(_) => "not_ready",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::Upstream(_) => "upstream",
            Self::Capture(_) => "capture",
        }
    }
}

impl From<CaptureError> for AnalysisError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::NotReady(message) => Self::NotReady(message),
            CaptureError::Cancelled => Self::Cancelled,
            other => Self::Capture(other.to_string()),
        }
    }
}
