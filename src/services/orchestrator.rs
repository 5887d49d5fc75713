use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::models::failure::JobFailure;
use crate::models::job::{AnalysisJob, FileSnapshot, JobId};
use crate::models::report::{JobOutcome, RunReport};
use crate::models::submission::{InputError, Submission};
use crate::services::aggregator::{JobEvent, ResultAggregator};
use crate::services::analyzer::{AnalyzerClient, Clock, SystemClock};
use crate::services::pool::WorkerPool;
use crate::services::queue::JobQueue;
use crate::services::rules::{RuleCatalog, RuleSet};

/// Entry point for audit runs: validates submissions and wires the queue,
/// worker pool, and aggregator for each one.
#[derive(Clone)]
pub struct Orchestrator {
    analyzer: Arc<dyn AnalyzerClient>,
    catalog: Arc<RuleCatalog>,
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        analyzer: Arc<dyn AnalyzerClient>,
        catalog: RuleCatalog,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            analyzer,
            catalog: Arc::new(catalog),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn analyzer_name(&self) -> &str {
        self.analyzer.name()
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Validate a submission and snapshot its files. Nothing is sent to the
    /// analyzer until [`PreparedRun::execute`].
    pub fn prepare(&self, submission: Submission) -> Result<PreparedRun, SubmissionError> {
        let base = self
            .catalog
            .get(&submission.rule_set_version)
            .ok_or_else(|| SubmissionError::UnknownRuleSet {
                version: submission.rule_set_version.clone(),
                known: self.catalog.versions().map(str::to_string).collect(),
            })?;
        let rule_set = Arc::new(base.with_extra_criteria(submission.extra_criteria.as_deref()));

        let mut all = Vec::with_capacity(submission.files.len());
        let mut runnable = Vec::new();
        let mut rejected = Vec::new();
        for (index, file) in submission.files.iter().enumerate() {
            let id = JobId(index);
            let (job, error) = match file.snapshot() {
                Ok(snapshot) => (AnalysisJob::new(id, snapshot, &rule_set.version), None),
                Err(e) => {
                    let placeholder = FileSnapshot::new(file.path.clone(), "");
                    (AnalysisJob::new(id, placeholder, &rule_set.version), Some(e))
                }
            };
            all.push(job.clone());
            match error {
                None => runnable.push(job),
                Some(e) => rejected.push((job, e)),
            }
        }

        let cancel = CancellationToken::new();
        let aggregator = Arc::new(ResultAggregator::new(
            submission.id,
            rule_set.version.clone(),
            all,
            cancel.clone(),
        ));

        metrics::counter!("audit_jobs_submitted_total").increment(submission.files.len() as u64);

        Ok(PreparedRun {
            submission_id: submission.id,
            runnable,
            rejected,
            rule_set,
            aggregator,
            cancel,
            analyzer: self.analyzer.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        })
    }

    /// Prepare and execute a submission to completion.
    pub async fn run(&self, submission: Submission) -> Result<RunReport, SubmissionError> {
        Ok(self.prepare(submission)?.execute().await)
    }
}

/// A validated submission, ready to execute. Subscribe to progress or grab
/// the cancel token before calling [`PreparedRun::execute`].
pub struct PreparedRun {
    submission_id: Uuid,
    runnable: Vec<AnalysisJob>,
    rejected: Vec<(AnalysisJob, InputError)>,
    rule_set: Arc<RuleSet>,
    aggregator: Arc<ResultAggregator>,
    cancel: CancellationToken,
    analyzer: Arc<dyn AnalyzerClient>,
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
}

impl PreparedRun {
    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    pub fn total_jobs(&self) -> usize {
        self.aggregator.total()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.aggregator.subscribe()
    }

    /// Handle for polling how many jobs have finished.
    pub fn progress(&self) -> RunProgress {
        RunProgress(self.aggregator.clone())
    }

    /// Token that cancels this run. Pending jobs are dropped; in-flight
    /// calls finish but their results are discarded.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every job to a terminal state. Never fails: all problems are
    /// reported per job.
    pub async fn execute(self) -> RunReport {
        let started_at = self.clock.now();
        let workers = self.config.worker_count(self.runnable.len());
        info!(
            submission_id = %self.submission_id,
            rule_set = %self.rule_set.version,
            jobs = self.aggregator.total(),
            rejected = self.rejected.len(),
            workers,
            analyzer = self.analyzer.name(),
            "Starting audit run"
        );

        for (job, error) in self.rejected {
            warn!(job_id = %job.id, error = %error, "Skipping invalid input");
            let failure = JobFailure::invalid_input(&job, error.to_string());
            self.aggregator.record(job, JobOutcome::Failure(failure));
        }

        if !self.runnable.is_empty() {
            let queue = Arc::new(JobQueue::new());
            for job in self.runnable {
                queue.enqueue(job);
            }
            WorkerPool::new(
                self.analyzer.clone(),
                queue,
                self.aggregator.clone(),
                self.rule_set.clone(),
                self.config.clone(),
                self.cancel.clone(),
            )
            .run(workers)
            .await;
        }

        let report = self.aggregator.finish(started_at, self.clock.now());
        metrics::counter!("audit_runs_total", "status" => report.status.to_string()).increment(1);
        info!(
            submission_id = %report.submission_id,
            status = %report.status,
            succeeded = report.counts.succeeded,
            failed = report.counts.failed,
            timed_out = report.counts.timed_out,
            cancelled = report.counts.cancelled,
            "Audit run complete"
        );
        report
    }
}

#[derive(Clone)]
pub struct RunProgress(Arc<ResultAggregator>);

impl RunProgress {
    pub fn completed(&self) -> usize {
        self.0.completed()
    }

    pub fn total(&self) -> usize {
        self.0.total()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("unknown rule-set version {version:?} (known: {})", .known.join(", "))]
    UnknownRuleSet { version: String, known: Vec<String> },
}
