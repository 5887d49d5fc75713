use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::job::{AnalysisJob, JobState};

struct QueuedJob {
    job: AnalysisJob,
    ready_at: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    /// Jobs handed out by `dequeue` or waiting in `pending` that have not
    /// yet been retired with `complete`.
    outstanding: usize,
    closed: bool,
}

/// In-process FIFO of analysis jobs shared by the workers of one run.
///
/// Each job is owned by exactly one party at a time: the queue while
/// pending, a single worker while running.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock only means a worker panicked; the queue data is
        // still consistent because every mutation is a single push/pop.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a new job at the back of the queue.
    pub fn enqueue(&self, mut job: AnalysisJob) {
        job.state = JobState::Pending;
        let mut state = self.lock();
        state.outstanding += 1;
        state.pending.push_back(QueuedJob {
            job,
            ready_at: Instant::now(),
        });
        drop(state);
        self.notify.notify_waiters();
    }

    /// Put a job back for another attempt once `delay` has elapsed.
    ///
    /// Returns the job unchanged when the queue has been closed, so the
    /// caller can record it as terminal instead.
    pub fn requeue(&self, mut job: AnalysisJob, delay: Duration) -> Result<(), AnalysisJob> {
        let mut state = self.lock();
        if state.closed {
            return Err(job);
        }
        job.state = JobState::Pending;
        state.pending.push_back(QueuedJob {
            job,
            ready_at: Instant::now() + delay,
        });
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Take the oldest job that is ready to run, waiting if necessary.
    ///
    /// Returns `None` once the queue is closed, `cancel` fires, or there is
    /// nothing pending and nothing outstanding.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<AnalysisJob> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                let now = Instant::now();
                if let Some(pos) = state.pending.iter().position(|q| q.ready_at <= now) {
                    return state.pending.remove(pos).map(|q| q.job);
                }
                if state.outstanding == 0 {
                    return None;
                }
                state.pending.iter().map(|q| q.ready_at).min()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
            }
        }
    }

    /// Retire a job that reached a terminal state.
    pub fn complete(&self) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        let drained = state.outstanding == 0;
        drop(state);
        if drained {
            self.notify.notify_waiters();
        }
    }

    /// Close the queue and hand back every pending job. Running jobs are
    /// untouched; their workers still call `complete` when they finish.
    fn drain_and_close(&self) -> Vec<AnalysisJob> {
        let mut state = self.lock();
        state.closed = true;
        let drained: Vec<AnalysisJob> = state.pending.drain(..).map(|q| q.job).collect();
        state.outstanding = state.outstanding.saturating_sub(drained.len());
        drop(state);
        self.notify.notify_waiters();
        drained
    }

    /// Cancel the run: every pending job becomes `Cancelled`.
    pub fn cancel_all(&self) -> Vec<AnalysisJob> {
        let mut jobs = self.drain_and_close();
        for job in &mut jobs {
            job.state = JobState::Cancelled;
        }
        jobs
    }

    /// Stop issuing work after a pool-wide failure: every pending job is
    /// returned as `Failed` for the caller to record with the shared cause.
    pub fn abort_pending(&self) -> Vec<AnalysisJob> {
        let mut jobs = self.drain_and_close();
        for job in &mut jobs {
            job.state = JobState::Failed;
        }
        jobs
    }

    /// Number of jobs waiting to be dequeued.
    pub fn depth(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
