use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::failure::{FailureKind, JobFailure};
use crate::models::job::{AnalysisJob, FileSnapshot, JobId};
use crate::models::verdict::Verdict;
use crate::services::rules::RuleSet;

/// One unit of work for an analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub job_id: JobId,
    pub file: FileSnapshot,
    pub rule_set: Arc<RuleSet>,
    pub timeout: Duration,
}

/// External analysis capability.
///
/// Implementations must be stateless between calls and must report every
/// failure as an [`AnalyzerError`], never by panicking.
#[async_trait]
pub trait AnalyzerClient: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Verdict, AnalyzerError>;

    /// Short name used in logs and health output.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyzerError {
    #[error("network error: {message}")]
    Network { message: String, retriable: bool },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("analyzer call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {reason}")]
    Malformed { reason: String, raw_text: String },
}

impl AnalyzerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalyzerError::Network { .. } => FailureKind::NetworkError,
            AnalyzerError::Auth(_) => FailureKind::AuthError,
            AnalyzerError::RateLimited { .. } => FailureKind::RateLimited,
            AnalyzerError::Timeout(_) => FailureKind::Timeout,
            AnalyzerError::Malformed { .. } => FailureKind::MalformedResponse,
        }
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            AnalyzerError::Network { retriable, .. } => *retriable,
            AnalyzerError::Auth(_) => false,
            AnalyzerError::RateLimited { .. }
            | AnalyzerError::Timeout(_)
            | AnalyzerError::Malformed { .. } => true,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AnalyzerError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Record this error against the job that produced it.
    pub fn into_failure(self, job: &AnalysisJob) -> JobFailure {
        let kind = self.kind();
        let retriable = self.is_retriable();
        let retry_after_ms = self.retry_after().map(|d| d.as_millis() as u64);
        let message = self.to_string();
        let raw_text = match self {
            AnalyzerError::Malformed { raw_text, .. } => Some(raw_text),
            _ => None,
        };

        JobFailure {
            job_id: job.id,
            kind,
            message,
            attempts: job.attempts,
            retriable,
            retry_after_ms,
            raw_text,
        }
    }
}

/// Source of wall-clock timestamps for reports.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
