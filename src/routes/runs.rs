use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::submission::{
    RunStatusResponse, SubmitRunRequest, SubmitRunResponse, Submission, SubmittedFile,
};
use crate::services::orchestrator::SubmissionError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (
        code,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// POST /api/v1/runs: accept a batch of files and start auditing them in
/// the background.
pub async fn submit_run(
    State(state): State<AppState>,
    Json(request): Json<SubmitRunRequest>,
) -> Result<(StatusCode, Json<SubmitRunResponse>), ApiError> {
    request
        .validate()
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let version = request
        .rule_set_version
        .unwrap_or_else(|| state.default_rule_set.clone());
    let mut submission = Submission::new(version);
    if let Some(criteria) = request.extra_criteria {
        submission = submission.with_extra_criteria(criteria);
    }
    for file in request.files {
        if !submission.push(SubmittedFile::new(file.path.as_str(), file.content)) {
            tracing::debug!(path = %file.path, "Dropping duplicate path");
        }
    }

    let run = state.orchestrator.prepare(submission).map_err(|e| match e {
        SubmissionError::UnknownRuleSet { .. } => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
    })?;
    let total_jobs = run.total_jobs();
    let run_id = state.runs.start(run);

    tracing::info!(run_id = %run_id, total_jobs, "Audit run accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitRunResponse {
            run_id,
            status: "running".to_string(),
            total_jobs,
        }),
    ))
}

/// GET /api/v1/runs/{run_id}: progress, plus the report once finished.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let snapshot = state
        .runs
        .get(run_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("run {run_id} not found")))?;

    Ok(Json(RunStatusResponse {
        run_id,
        status: snapshot.phase.to_string(),
        completed_jobs: snapshot.completed_jobs,
        total_jobs: snapshot.total_jobs,
        report: snapshot.report.map(|r| (*r).clone()),
    }))
}

/// POST /api/v1/runs/{run_id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.runs.cancel(run_id) {
        tracing::info!(run_id = %run_id, "Cancellation requested");
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("run {run_id} not found")))
    }
}
