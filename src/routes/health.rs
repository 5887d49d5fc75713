use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub analyzer: String,
    pub rule_sets: Vec<String>,
    pub active_runs: usize,
}

/// GET /health: liveness plus what this instance can audit with.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let rule_sets: Vec<String> = state
        .orchestrator
        .catalog()
        .versions()
        .map(str::to_string)
        .collect();

    let (code, status) = if rule_sets.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        analyzer: state.orchestrator.analyzer_name().to_string(),
        rule_sets,
        active_runs: state.runs.active(),
    };

    (code, Json(response))
}
