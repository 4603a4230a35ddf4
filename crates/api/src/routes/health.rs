//! Health check endpoint.

use axum::Json;
use orchestrator::Job;
use serde::Serialize;

const JOB_NAMES: &[&str] = &Job::NAMES;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs: &'static [&'static str],
}

/// GET /health: returns liveness and the job names the intake accepts.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        jobs: JOB_NAMES,
    })
}
