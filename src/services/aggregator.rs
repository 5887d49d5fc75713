use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::models::failure::{FailureKind, JobFailure};
use crate::models::job::{AnalysisJob, JobId, JobState};
use crate::models::report::{JobOutcome, ReportEntry, RunReport, StateCounts};

/// Emitted each time a job reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub path: PathBuf,
    pub state: JobState,
    pub attempts: u32,
    pub completed: usize,
    pub total: usize,
}

/// Collects terminal outcomes for one run and builds its [`RunReport`].
pub struct ResultAggregator {
    submission_id: Uuid,
    rule_set_version: String,
    /// Jobs in submission order.
    expected: Vec<AnalysisJob>,
    cancel: CancellationToken,
    outcomes: Mutex<HashMap<JobId, ReportEntry>>,
    events: broadcast::Sender<JobEvent>,
}

impl ResultAggregator {
    pub fn new(
        submission_id: Uuid,
        rule_set_version: impl Into<String>,
        expected: Vec<AnalysisJob>,
        cancel: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(expected.len().max(16));
        Self {
            submission_id,
            rule_set_version: rule_set_version.into(),
            outcomes: Mutex::new(HashMap::with_capacity(expected.len())),
            expected,
            cancel,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, ReportEntry>> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Observe per-job completion as it happens.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn total(&self) -> usize {
        self.expected.len()
    }

    pub fn completed(&self) -> usize {
        self.lock().len()
    }

    /// Record the terminal outcome of a job. The first outcome for a job
    /// wins; once the run is cancelled every new outcome is replaced by a
    /// cancellation.
    pub fn record(&self, mut job: AnalysisJob, outcome: JobOutcome) -> bool {
        let outcome = match outcome {
            JobOutcome::Failure(f) if f.kind == FailureKind::Cancelled => JobOutcome::Failure(f),
            _ if self.cancel.is_cancelled() => JobOutcome::Failure(JobFailure::cancelled(&job)),
            other => other,
        };

        job.state = match &outcome {
            JobOutcome::Verdict(_) => JobState::Succeeded,
            JobOutcome::Failure(f) => f.kind.terminal_state(),
        };

        let event = JobEvent {
            job_id: job.id,
            path: job.file.path.clone(),
            state: job.state,
            attempts: job.attempts,
            completed: 0,
            total: self.total(),
        };

        let completed = {
            let mut outcomes = self.lock();
            if outcomes.contains_key(&job.id) {
                warn!(job_id = %job.id, "Ignoring second outcome for job");
                return false;
            }
            outcomes.insert(job.id, ReportEntry { job, outcome });
            outcomes.len()
        };

        metrics::counter!("audit_jobs_finished_total", "state" => event.state.to_string())
            .increment(1);
        // No subscribers is fine.
        let _ = self.events.send(JobEvent { completed, ..event });
        true
    }

    /// Build the report in submission order. Jobs that never reported an
    /// outcome are listed as cancelled.
    pub fn finish(&self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> RunReport {
        let mut outcomes = std::mem::take(&mut *self.lock());

        let entries: Vec<ReportEntry> = self
            .expected
            .iter()
            .map(|job| {
                outcomes.remove(&job.id).unwrap_or_else(|| {
                    warn!(job_id = %job.id, "Job finished without an outcome");
                    let mut job = job.clone();
                    job.state = JobState::Cancelled;
                    let failure = JobFailure::terminal(
                        &job,
                        FailureKind::Cancelled,
                        "worker stopped before recording an outcome",
                    );
                    ReportEntry {
                        job,
                        outcome: JobOutcome::Failure(failure),
                    }
                })
            })
            .collect();

        let counts = StateCounts::tally(entries.iter().map(|e| &e.job.state));
        RunReport {
            submission_id: self.submission_id,
            rule_set_version: self.rule_set_version.clone(),
            status: counts.run_status(),
            counts,
            entries,
            started_at,
            completed_at,
            cancelled: self.cancel.is_cancelled(),
        }
    }
}
