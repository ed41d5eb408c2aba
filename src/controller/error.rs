//! Error types for the controller.
//!
//! The taxonomy drives retry behavior:
//! - validation errors are never retried against the API
//! - transient infrastructure errors retry with bounded backoff
//! - dependency-not-ready is a waiting state, not a failure
//! - exhausted retry budgets surface with full context for the operator

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Neo4j query or connection error
    #[error("Neo4j error: {0}")]
    Neo4j(String),

    /// A referenced resource exists but is not Ready yet. Expected and
    /// recoverable: requeue on a fixed interval, never phase=Failed.
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    /// Optimistic-concurrency retry budget exhausted in the applier.
    #[error("Conflict retries exhausted for {resource} after {attempts} attempts")]
    ConflictRetriesExhausted { resource: String, attempts: u32 },

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error indicates an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_) | Error::Neo4j(_) | Error::DependencyNotReady(_) => true,
            Error::ConflictRetriesExhausted { .. } => true,
            Error::Validation(_) | Error::Serialization(_) => false,
        }
    }

    /// Check if this error is a waiting state rather than a failure
    pub fn is_waiting(&self) -> bool {
        matches!(self, Error::DependencyNotReady(_))
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        match self {
            Error::DependencyNotReady(_) => Duration::from_secs(15),
            Error::ConflictRetriesExhausted { .. } => Duration::from_secs(10),
            _ if self.is_retryable() => Duration::from_secs(30),
            // Non-retryable: only a spec edit clears it, the long requeue is
            // a safety net
            _ => Duration::from_secs(3600),
        }
    }

    /// Map to the fixed condition-reason vocabulary.
    pub fn reason(&self) -> &'static str {
        use crate::crd::reasons;
        match self {
            Error::Validation(_) => reasons::VALIDATION_FAILED,
            Error::Neo4j(_) => reasons::CONNECTION_FAILED,
            Error::DependencyNotReady(_) => reasons::CLUSTER_NOT_READY,
            Error::Kube(e) if matches!(e, kube::Error::Api(a) if a.code == 404) => {
                reasons::CLUSTER_NOT_FOUND
            }
            _ => reasons::CREATION_FAILED,
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
