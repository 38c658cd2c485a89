//! Error taxonomy for the detection pipeline.
//!
//! Every failure a caller can observe is a [`DetectionError`]. The
//! orchestrator converts the fatal ones into a `failed` job with the error
//! text recorded verbatim; [`DetectionError::ExternalService`] is the only
//! recoverable class and triggers the automated fallback instead.

use thiserror::Error;

use crate::models::JobStatus;

/// Errors surfaced by catalog, job and detection operations.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Missing or malformed caller input. No side effect has happened.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced job, protected work or scanned item does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The external judge failed (transport, non-2xx, unparseable reply).
    #[error("external service error: {message}")]
    ExternalService { message: String, retryable: bool },

    /// Unexpected failure while fingerprinting or comparing.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A job status change outside the allowed state machine.
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Persistence failure reported by a [`Store`](crate::store::Store).
    #[error("storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl DetectionError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DetectionError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn external(message: impl Into<String>, retryable: bool) -> Self {
        DetectionError::ExternalService {
            message: message.into(),
            retryable,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DetectionError::ExternalService {
                retryable: true,
                ..
            }
        )
    }
}
