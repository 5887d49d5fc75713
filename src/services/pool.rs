use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::models::failure::{FailureKind, JobFailure};
use crate::models::job::AnalysisJob;
use crate::models::report::JobOutcome;
use crate::services::aggregator::ResultAggregator;
use crate::services::analyzer::{AnalysisRequest, AnalyzerClient, AnalyzerError};
use crate::services::queue::JobQueue;
use crate::services::rules::RuleSet;

struct PoolShared {
    analyzer: Arc<dyn AnalyzerClient>,
    queue: Arc<JobQueue>,
    aggregator: Arc<ResultAggregator>,
    rule_set: Arc<RuleSet>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    /// Pool-wide pause set after a rate-limit response.
    paused_until: Mutex<Option<Instant>>,
    /// First authentication rejection; fails jobs that can no longer retry.
    auth_failure: Mutex<Option<AnalyzerError>>,
}

/// Fixed set of workers draining one run's [`JobQueue`].
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(
        analyzer: Arc<dyn AnalyzerClient>,
        queue: Arc<JobQueue>,
        aggregator: Arc<ResultAggregator>,
        rule_set: Arc<RuleSet>,
        config: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                analyzer,
                queue,
                aggregator,
                rule_set,
                config,
                cancel,
                paused_until: Mutex::new(None),
                auth_failure: Mutex::new(None),
            }),
        }
    }

    /// Run `workers` workers until every job is terminal or the run is
    /// cancelled and in-flight calls have returned.
    pub async fn run(self, workers: usize) {
        let mut set = JoinSet::new();
        for worker in 0..workers.max(1) {
            let shared = self.shared.clone();
            set.spawn(async move { shared.worker_loop(worker).await });
        }

        let mut drained = false;
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => error!(error = %e, "Worker task failed"),
                    None => break,
                },
                _ = self.shared.cancel.cancelled(), if !drained => {
                    drained = true;
                    self.shared.cancel_pending();
                }
            }
        }

        if self.shared.cancel.is_cancelled() && !drained {
            self.shared.cancel_pending();
        }
    }
}

impl PoolShared {
    async fn worker_loop(&self, worker: usize) {
        debug!(worker, "Worker started");
        loop {
            if !self.wait_out_pause().await {
                break;
            }
            let Some(mut job) = self.queue.dequeue(&self.cancel).await else {
                break;
            };
            // A pause may have started while this worker waited for a job.
            if !self.wait_out_pause().await {
                let failure = JobFailure::cancelled(&job);
                self.aggregator.record(job, JobOutcome::Failure(failure));
                self.queue.complete();
                break;
            }

            job.start_attempt();
            metrics::gauge!("audit_queue_depth").set(self.queue.depth() as f64);
            info!(
                worker,
                job_id = %job.id,
                file = %job.file.path.display(),
                attempt = job.attempts,
                "Analyzing file"
            );

            let request = AnalysisRequest {
                job_id: job.id,
                file: job.file.clone(),
                rule_set: self.rule_set.clone(),
                timeout: self.config.job_timeout,
            };

            let start = Instant::now();
            let result = match tokio::time::timeout(
                self.config.job_timeout,
                self.analyzer.analyze(&request),
            )
            .await
            {
                Ok(result) => result,
                // Dropping the call future releases its connection.
                Err(_) => Err(AnalyzerError::Timeout(self.config.job_timeout)),
            };
            let elapsed = start.elapsed();
            metrics::histogram!("audit_analyzer_call_seconds").record(elapsed.as_secs_f64());

            match result {
                Ok(verdict) => {
                    info!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        failed_rules = verdict.failed_rules().count(),
                        "File analyzed"
                    );
                    self.aggregator.record(job, JobOutcome::Verdict(verdict));
                    self.queue.complete();
                }
                Err(err) => self.handle_failure(job, err),
            }
        }
        debug!(worker, "Worker exiting");
    }

    fn handle_failure(&self, mut job: AnalysisJob, mut err: AnalyzerError) {
        let kind = err.kind();

        match kind {
            FailureKind::RateLimited => self.pause_pool(err.retry_after()),
            FailureKind::AuthError => self.abort_after_auth(&err),
            _ => {}
        }

        if err.is_retriable()
            && job.attempts <= self.retry_limit_for(kind)
            && !self.cancel.is_cancelled()
        {
            let delay = self
                .config
                .backoff_for(job.attempts)
                .max(err.retry_after().unwrap_or_default());
            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                kind = %kind,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Analysis failed, job re-queued for retry"
            );
            metrics::counter!("audit_job_retries_total", "kind" => kind.to_string()).increment(1);

            job = match self.queue.requeue(job, delay) {
                Ok(()) => return,
                Err(job) => job,
            };
            // Closed by an auth abort: report the rejection, not the
            // transient error this attempt happened to hit.
            if let Some(cause) = self.auth_cause() {
                err = cause;
            }
        }

        let mut failure = err.into_failure(&job);
        // No further attempt will be made.
        failure.retriable = false;
        warn!(
            job_id = %job.id,
            attempts = failure.attempts,
            kind = %failure.kind,
            error = %failure.message,
            "Job failed"
        );
        self.aggregator.record(job, JobOutcome::Failure(failure));
        self.queue.complete();
    }

    fn retry_limit_for(&self, kind: FailureKind) -> u32 {
        match kind {
            FailureKind::NetworkError | FailureKind::RateLimited | FailureKind::Timeout => {
                self.config.retry_limit
            }
            FailureKind::MalformedResponse => self.config.malformed_retry_limit,
            FailureKind::AuthError | FailureKind::Cancelled | FailureKind::InvalidInput => 0,
        }
    }

    fn pause_pool(&self, hint: Option<Duration>) {
        let pause = hint.unwrap_or_default().max(self.config.rate_limit_pause);
        let until = Instant::now() + pause;
        let mut paused = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        if paused.map_or(true, |current| current < until) {
            *paused = Some(until);
            warn!(pause_ms = pause.as_millis() as u64, "Rate limited, pausing worker pool");
        }
    }

    /// Sleep through any active pool pause. Returns false if the run was
    /// cancelled meanwhile.
    async fn wait_out_pause(&self) -> bool {
        loop {
            let until = *self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
            match until {
                Some(at) if at > Instant::now() => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.cancel.cancelled() => return false,
                    }
                }
                _ => return !self.cancel.is_cancelled(),
            }
        }
    }

    /// Every later call would be rejected the same way: stop issuing work
    /// and fail what is still pending with the same cause.
    fn abort_after_auth(&self, cause: &AnalyzerError) {
        let mut stored = self.auth_failure.lock().unwrap_or_else(|e| e.into_inner());
        if stored.is_none() {
            *stored = Some(cause.clone());
        }
        drop(stored);

        let aborted = self.queue.abort_pending();
        if aborted.is_empty() {
            return;
        }
        error!(
            jobs = aborted.len(),
            error = %cause,
            "Authentication rejected, failing remaining jobs"
        );
        for job in aborted {
            let failure = cause.clone().into_failure(&job);
            self.aggregator.record(job, JobOutcome::Failure(failure));
        }
    }

    fn auth_cause(&self) -> Option<AnalyzerError> {
        self.auth_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn cancel_pending(&self) {
        let cancelled = self.queue.cancel_all();
        info!(jobs = cancelled.len(), "Run cancelled, dropping pending jobs");
        for job in cancelled {
            let failure = JobFailure::cancelled(&job);
            self.aggregator.record(job, JobOutcome::Failure(failure));
        }
    }
}
