use std::sync::Arc;

use crate::services::orchestrator::Orchestrator;
use crate::services::runs::RunRegistry;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub runs: Arc<RunRegistry>,
    /// Rule set used when a request does not name one.
    pub default_rule_set: String,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, default_rule_set: impl Into<String>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            runs: Arc::new(RunRegistry::new()),
            default_rule_set: default_rule_set.into(),
        }
    }

    /// Keep at most `max_completed` finished runs queryable.
    pub fn with_run_retention(mut self, max_completed: usize) -> Self {
        self.runs = Arc::new(RunRegistry::with_retention(max_completed));
        self
    }
}
