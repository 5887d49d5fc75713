use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Prometheus scrape endpoint (text exposition format).
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the orchestrator emits.
pub fn describe() {
    metrics::describe_counter!(
        "audit_jobs_submitted_total",
        "Files accepted into an audit run"
    );
    metrics::describe_counter!(
        "audit_jobs_finished_total",
        "Jobs that reached a terminal state, by state"
    );
    metrics::describe_counter!(
        "audit_job_retries_total",
        "Jobs re-queued after a retriable failure, by failure kind"
    );
    metrics::describe_histogram!(
        "audit_analyzer_call_seconds",
        "Latency of a single analyzer call"
    );
    metrics::describe_gauge!(
        "audit_queue_depth",
        "Jobs waiting in the most recently sampled run queue"
    );
    metrics::describe_counter!("audit_runs_total", "Completed runs, by run status");
}
