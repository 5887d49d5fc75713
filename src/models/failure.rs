use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::models::job::{AnalysisJob, JobId, JobState};

/// Why a job ended without a verdict.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    NetworkError,
    AuthError,
    RateLimited,
    Timeout,
    MalformedResponse,
    Cancelled,
    /// The file was unreadable or empty and was never sent to the analyzer.
    InvalidInput,
}

impl FailureKind {
    /// Terminal job state recorded for this kind of failure.
    pub fn terminal_state(self) -> JobState {
        match self {
            FailureKind::Timeout => JobState::TimedOut,
            FailureKind::Cancelled => JobState::Cancelled,
            _ => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub job_id: JobId,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    pub retriable: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_after_ms: Option<u64>,
    /// Model output that could not be parsed, kept as evidence.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub raw_text: Option<String>,
}

impl JobFailure {
    pub fn cancelled(job: &AnalysisJob) -> Self {
        Self::terminal(job, FailureKind::Cancelled, "run cancelled before the job finished")
    }

    pub fn invalid_input(job: &AnalysisJob, message: impl Into<String>) -> Self {
        Self::terminal(job, FailureKind::InvalidInput, message)
    }

    /// A non-retriable failure carrying the job's current attempt count.
    pub fn terminal(job: &AnalysisJob, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            kind,
            message: message.into(),
            attempts: job.attempts,
            retriable: false,
            retry_after_ms: None,
            raw_text: None,
        }
    }
}
