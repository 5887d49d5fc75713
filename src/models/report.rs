use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use uuid::Uuid;

use crate::models::failure::JobFailure;
use crate::models::job::{AnalysisJob, JobState};
use crate::models::verdict::Verdict;

/// Terminal outcome of one job.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutcome {
    Verdict(Verdict),
    Failure(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Verdict(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub job: AnalysisJob,
    pub outcome: JobOutcome,
}

/// Overall classification of a run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    AllSucceeded,
    PartialFailure,
    TotalFailure,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StateCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

impl StateCounts {
    pub fn tally<'a>(states: impl IntoIterator<Item = &'a JobState>) -> Self {
        let mut counts = Self::default();
        for state in states {
            match state {
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
                JobState::TimedOut => counts.timed_out += 1,
                JobState::Cancelled => counts.cancelled += 1,
                JobState::Pending | JobState::Running => {}
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.timed_out + self.cancelled
    }

    pub fn run_status(&self) -> RunStatus {
        if self.succeeded == self.total() {
            RunStatus::AllSucceeded
        } else if self.succeeded > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::TotalFailure
        }
    }
}

/// Order-stable aggregation of every job outcome for one submission.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub submission_id: Uuid,
    pub rule_set_version: String,
    pub entries: Vec<ReportEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub counts: StateCounts,
    pub status: RunStatus,
    pub cancelled: bool,
}

impl RunReport {
    pub fn entry(&self, file_name: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.job.file.file_name == file_name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
