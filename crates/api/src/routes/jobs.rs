//! Job intake endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use common::IdempotencyKey;
use event_log::EventLog;
use orchestrator::{Job, JobOutcome};
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying the job key used for delivery dedup.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// POST /jobs/{name}: decodes and runs a named job.
///
/// A repeated request with the same `Idempotency-Key` returns the result
/// recorded by the first run with `deduplicated: true`.
pub async fn dispatch<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<JobOutcome>, ApiError> {
    let key = idempotency_key(&headers)?;
    let job = Job::parse(&name, payload)?;
    let outcome = state.engine.jobs.dispatch(job, key.as_ref()).await?;
    Ok(Json(outcome))
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, ApiError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("Idempotency-Key must be visible ASCII".to_string()))?
        .trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest(
            "Idempotency-Key must not be empty".to_string(),
        ));
    }
    Ok(Some(IdempotencyKey::new(key)))
}
