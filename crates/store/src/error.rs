use event_log::EventLogError;
use thiserror::Error;

/// Errors raised by a store while committing a unit of work.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The event log rejected the staged events; nothing was committed.
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// A stored idempotency record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store is unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
