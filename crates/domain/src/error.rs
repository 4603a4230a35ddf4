//! Domain error types.

use common::{InventoryUnitId, ProductVariantId};
use serde::Serialize;
use thiserror::Error;

/// Discriminant of an error, for callers that map errors to transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidStateTransition,
    InsufficientQuantity,
    InsufficientInventory,
    InvalidQuantity,
    Conflict,
    PreconditionFailed,
    /// Malformed input outside the domain, such as an undecodable job payload.
    InvalidInput,
    Storage,
}

impl ErrorKind {
    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::InsufficientQuantity => "insufficient_quantity",
            ErrorKind::InsufficientInventory => "insufficient_inventory",
            ErrorKind::InvalidQuantity => "invalid_quantity",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the ledger, the policy engine and the state machines.
///
/// Every variant carries enough context to render a precise message without
/// parsing text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// An entity id did not resolve.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A state machine rejected the requested move.
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A unit cannot cover a requested decrement.
    #[error("Insufficient quantity on unit {unit_id}: requested {requested}, available {available}")]
    InsufficientQuantity {
        unit_id: InventoryUnitId,
        requested: u32,
        available: u32,
    },

    /// A policy could not satisfy a demand for a product variant.
    #[error(
        "Insufficient inventory for variant {product_variant_id}: requested {requested}, allocatable {allocatable}"
    )]
    InsufficientInventory {
        product_variant_id: ProductVariantId,
        requested: u32,
        allocatable: u32,
    },

    /// A quantity input is zero or out of range.
    #[error("Invalid quantity {quantity}: {reason}")]
    InvalidQuantity { quantity: u32, reason: &'static str },

    /// A uniqueness business rule was violated.
    #[error("{entity} conflict: {reason}")]
    Conflict { entity: &'static str, reason: String },

    /// A gate required before the operation was not met.
    #[error("Precondition failed: {reason}")]
    PreconditionFailed { reason: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        DomainError::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, reason: impl Into<String>) -> Self {
        DomainError::Conflict {
            entity,
            reason: reason.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        DomainError::PreconditionFailed {
            reason: reason.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            DomainError::InsufficientQuantity { .. } => ErrorKind::InsufficientQuantity,
            DomainError::InsufficientInventory { .. } => ErrorKind::InsufficientInventory,
            DomainError::InvalidQuantity { .. } => ErrorKind::InvalidQuantity,
            DomainError::Conflict { .. } => ErrorKind::Conflict,
            DomainError::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
