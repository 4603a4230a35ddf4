use thiserror::Error;

use crate::EventId;

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// An event with the same id is already in the log.
    #[error("Duplicate event: {0}")]
    DuplicateEvent(EventId),

    /// The batch handed to `append` was rejected before touching storage.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A stored event type string is not part of the catalog.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
