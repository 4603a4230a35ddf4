//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::ErrorKind;
use event_log::EventLogError;
use orchestrator::OrchestratorError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request that never reached the engine.
    #[error("{0}")]
    BadRequest(String),

    /// Failure reported by an orchestrator or job.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// The audit trail could not be read.
    #[error(transparent)]
    EventLog(#[from] EventLogError),
}

impl ApiError {
    /// Returns the error kind reported in the response body.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) => ErrorKind::InvalidInput,
            ApiError::Orchestrator(err) => err.kind(),
            ApiError::EventLog(_) => ErrorKind::Storage,
        }
    }
}

/// Maps an error kind to its HTTP status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidStateTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InsufficientQuantity | ErrorKind::InsufficientInventory => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::InvalidQuantity | ErrorKind::PreconditionFailed | ErrorKind::InvalidInput => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        }

        let body = serde_json::json!({ "error": self.to_string(), "kind": kind.as_str() });
        (status, axum::Json(body)).into_response()
    }
}
