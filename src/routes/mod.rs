pub mod health;
pub mod metrics;
pub mod runs;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Health and run endpoints. The binary adds `/metrics` and the tower-http
/// layers on top.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/runs", post(runs::submit_run))
        .route("/api/v1/runs/{run_id}", get(runs::get_run))
        .route("/api/v1/runs/{run_id}/cancel", post(runs::cancel_run))
        .with_state(state)
}
