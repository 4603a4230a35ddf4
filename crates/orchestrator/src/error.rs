//! Orchestrator error types.

use domain::{DomainError, ErrorKind};
use store::StoreError;
use thiserror::Error;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A domain rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The store could not commit the unit of work.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A stored result or event payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No job is registered under this name.
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// A job payload did not match the job's schema.
    #[error("Invalid payload for job {job}: {reason}")]
    InvalidPayload { job: String, reason: String },
}

impl OrchestratorError {
    /// Returns the error kind used for transport mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Domain(e) => e.kind(),
            OrchestratorError::Store(_) | OrchestratorError::Serialization(_) => {
                ErrorKind::Storage
            }
            OrchestratorError::UnknownJob(_) => ErrorKind::NotFound,
            OrchestratorError::InvalidPayload { .. } => ErrorKind::InvalidInput,
        }
    }
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
