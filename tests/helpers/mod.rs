//! Scripted analyzer and fixed clock for driving the orchestrator in tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use code_audit::config::OrchestratorConfig;
use code_audit::models::submission::{Submission, SubmittedFile};
use code_audit::models::verdict::Verdict;
use code_audit::services::analyzer::{AnalysisRequest, AnalyzerClient, AnalyzerError, Clock};
use code_audit::services::orchestrator::Orchestrator;
use code_audit::services::parser;
use code_audit::services::rules::{RuleCatalog, DEFAULT_RULE_SET};

use crate::fixtures;

/// What the stub does on one call for a given file.
#[derive(Debug, Clone)]
pub enum Step {
    /// Reply with a well-formed all-PASS response.
    Pass,
    /// Reply with this raw text.
    Respond(String),
    Fail(AnalyzerError),
    /// Never reply; only the orchestrator's timeout ends the call.
    Hang,
}

/// One recorded analyzer call.
#[derive(Debug, Clone)]
pub struct Call {
    pub file_name: String,
    pub at: Instant,
}

/// Deterministic [`AnalyzerClient`]: per-file scripts of steps and
/// latencies. Once a file's script runs out every further call passes.
pub struct ScriptedAnalyzer {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    latencies: HashMap<String, Duration>,
    default_latency: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: Mutex<(usize, usize)>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            latencies: HashMap::new(),
            default_latency: Duration::from_millis(10),
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new((0, 0)),
        }
    }

    pub fn script(self, file_name: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(file_name.to_string(), steps.into_iter().collect());
        self
    }

    /// Use the same steps for every listed file.
    pub fn script_all<'a>(
        mut self,
        file_names: impl IntoIterator<Item = &'a str>,
        steps: &[Step],
    ) -> Self {
        for name in file_names {
            self = self.script(name, steps.iter().cloned());
        }
        self
    }

    pub fn latency(mut self, file_name: &str, latency: Duration) -> Self {
        self.latencies.insert(file_name.to_string(), latency);
        self
    }

    pub fn default_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, file_name: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.file_name == file_name)
            .map(|c| c.at)
            .collect()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.in_flight.lock().unwrap().1
    }

    fn next_step(&self, file_name: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(file_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Pass)
    }
}

struct InFlight<'a>(&'a Mutex<(usize, usize)>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a Mutex<(usize, usize)>) -> Self {
        let mut c = counter.lock().unwrap();
        c.0 += 1;
        c.1 = c.1.max(c.0);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap().0 -= 1;
    }
}

#[async_trait]
impl AnalyzerClient for ScriptedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Verdict, AnalyzerError> {
        let file_name = request.file.file_name.clone();
        self.calls.lock().unwrap().push(Call {
            file_name: file_name.clone(),
            at: Instant::now(),
        });
        let _guard = InFlight::enter(&self.in_flight);

        let step = self.next_step(&file_name);
        let latency = self
            .latencies
            .get(&file_name)
            .copied()
            .unwrap_or(self.default_latency);
        tokio::time::sleep(latency).await;

        let text = match step {
            Step::Pass => fixtures::response_for(&request.rule_set, "PASS"),
            Step::Respond(text) => text,
            Step::Fail(err) => return Err(err),
            Step::Hang => std::future::pending().await,
        };

        parser::parse_verdict(request.job_id, &text, &request.rule_set, fixed_time()).map_err(
            |e| AnalyzerError::Malformed {
                reason: e.to_string(),
                raw_text: text,
            },
        )
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Clock that always reads [`fixed_time`].
pub struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        fixed_time()
    }
}

/// Fast policy for tests: short backoff, explicit limits.
pub fn test_config(workers: usize, retry_limit: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrency: Some(workers),
        job_timeout: Duration::from_secs(5),
        retry_limit,
        malformed_retry_limit: retry_limit.min(1),
        backoff_base: Duration::from_millis(100),
        backoff_max: Duration::from_secs(2),
        rate_limit_pause: Duration::from_secs(3),
    }
}

pub fn orchestrator(analyzer: Arc<ScriptedAnalyzer>, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::new(analyzer, RuleCatalog::builtin(), config).with_clock(Arc::new(FixedClock))
}

pub fn submission<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Submission
where
    P: AsRef<str>,
    C: AsRef<str>,
{
    let mut submission = Submission::new(DEFAULT_RULE_SET).with_id(uuid::Uuid::nil());
    for (path, content) in files {
        submission.push(SubmittedFile::new(path.as_ref(), content.as_ref()));
    }
    submission
}

pub fn network_error() -> AnalyzerError {
    AnalyzerError::Network {
        message: "connection reset by peer".to_string(),
        retriable: true,
    }
}

pub fn rate_limited() -> AnalyzerError {
    AnalyzerError::RateLimited {
        message: "quota exceeded".to_string(),
        retry_after: None,
    }
}

pub fn auth_error() -> AnalyzerError {
    AnalyzerError::Auth("API key not valid".to_string())
}
