use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::report::RunReport;
use crate::services::orchestrator::{PreparedRun, RunProgress};

struct RunEntry {
    cancel: CancellationToken,
    progress: RunProgress,
    report: Option<Arc<RunReport>>,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub completed_jobs: usize,
    pub total_jobs: usize,
    pub report: Option<Arc<RunReport>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    Running,
    Cancelling,
    Completed,
}

#[derive(Default)]
struct Runs {
    entries: HashMap<Uuid, RunEntry>,
    /// Completed run ids, oldest first.
    finished: VecDeque<Uuid>,
}

/// In-memory registry of runs started through the HTTP API.
///
/// Running runs are always kept. Once more than `max_completed` runs have
/// finished, the oldest finished ones are dropped and become unknown.
pub struct RunRegistry {
    runs: RwLock<Runs>,
    max_completed: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_retention(crate::config::default_run_retention())
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(max_completed: usize) -> Self {
        Self {
            runs: RwLock::new(Runs::default()),
            max_completed: max_completed.max(1),
        }
    }

    /// Spawn a prepared run in the background and track it.
    pub fn start(self: &Arc<Self>, run: PreparedRun) -> Uuid {
        let run_id = run.submission_id();
        let entry = RunEntry {
            cancel: run.cancel_token(),
            progress: run.progress(),
            report: None,
        };
        self.runs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .insert(run_id, entry);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let report = run.execute().await;
            registry.finish(run_id, report);
        });

        run_id
    }

    fn finish(&self, run_id: Uuid, report: RunReport) {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = runs.entries.get_mut(&run_id) else {
            return;
        };
        entry.report = Some(Arc::new(report));
        runs.finished.push_back(run_id);

        while runs.finished.len() > self.max_completed {
            if let Some(evicted) = runs.finished.pop_front() {
                runs.entries.remove(&evicted);
                tracing::debug!(run_id = %evicted, "Dropped retained run report");
            }
        }
    }

    pub fn get(&self, run_id: Uuid) -> Option<RunSnapshot> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        let entry = runs.entries.get(&run_id)?;
        let phase = match (&entry.report, entry.cancel.is_cancelled()) {
            (Some(_), _) => RunPhase::Completed,
            (None, true) => RunPhase::Cancelling,
            (None, false) => RunPhase::Running,
        };
        Some(RunSnapshot {
            run_id,
            phase,
            completed_jobs: entry.progress.completed(),
            total_jobs: entry.progress.total(),
            report: entry.report.clone(),
        })
    }

    /// Request cancellation. Returns false for unknown runs.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        match runs.entries.get(&run_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> usize {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .values()
            .filter(|e| e.report.is_none())
            .count()
    }
}
