//! Storage location registration.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::Location;
use event_log::EventLog;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLocationRequest {
    pub code: String,
    pub pick_sequence: u32,
    #[serde(default)]
    pub zone: Option<String>,
}

/// POST /locations: registers a location on the walking path.
pub async fn create<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(request): Json<CreateLocationRequest>,
) -> Result<(StatusCode, Json<Location>), ApiError> {
    if request.code.trim().is_empty() {
        return Err(ApiError::BadRequest("location code is required".to_string()));
    }
    let mut location = Location::new(request.code.trim(), request.pick_sequence);
    location.zone = request.zone.filter(|z| !z.trim().is_empty());
    let location = state.engine.allocation.create_location(location).await?;
    Ok((StatusCode::CREATED, Json(location)))
}
