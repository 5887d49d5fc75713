use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the CLI.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Google Generative Language API key
    pub gemini_api_key: String,

    #[serde(default = "default_model")]
    pub gemini_model: String,

    #[serde(default = "default_base_url")]
    pub gemini_base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Worker count; defaults to available parallelism.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_rate_limit_pause_ms")]
    pub rate_limit_pause_ms: u64,

    #[serde(default = "default_rule_set_version")]
    pub rule_set_version: String,

    /// Completed runs the HTTP server keeps before dropping the oldest.
    #[serde(default = "default_run_retention")]
    pub run_retention: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash-latest".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    32
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_job_timeout_secs() -> u64 {
    400
}

fn default_retry_limit() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_rate_limit_pause_ms() -> u64 {
    2000
}

fn default_rule_set_version() -> String {
    crate::services::rules::DEFAULT_RULE_SET.to_string()
}

pub(crate) fn default_run_retention() -> usize {
    100
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gemini_api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("GEMINI_API_KEY is empty".to_string()));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid("JOB_TIMEOUT_SECS must be positive".to_string()));
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "BACKOFF_BASE_MS must be positive and not exceed BACKOFF_MAX_MS".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid("MAX_CONCURRENCY must be positive".to_string()));
        }
        if self.run_retention == 0 {
            return Err(ConfigError::Invalid("RUN_RETENTION must be positive".to_string()));
        }
        Ok(())
    }

    pub fn analyzer(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
            base_url: self.gemini_base_url.trim_end_matches('/').to_string(),
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_output_tokens: self.max_output_tokens,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.max_concurrency,
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            retry_limit: self.retry_limit,
            malformed_retry_limit: self.retry_limit.min(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            rate_limit_pause: Duration::from_millis(self.rate_limit_pause_ms),
        }
    }
}

/// Connection and generation settings for the model API.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

/// Scheduling, retry, and timeout policy for a run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrency: Option<usize>,
    pub job_timeout: Duration,
    pub retry_limit: u32,
    pub malformed_retry_limit: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub rate_limit_pause: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            job_timeout: Duration::from_secs(default_job_timeout_secs()),
            retry_limit: default_retry_limit(),
            malformed_retry_limit: 1,
            backoff_base: Duration::from_millis(default_backoff_base_ms()),
            backoff_max: Duration::from_millis(default_backoff_max_ms()),
            rate_limit_pause: Duration::from_millis(default_rate_limit_pause_ms()),
        }
    }
}

impl OrchestratorConfig {
    /// Worker count for a run of `jobs` files.
    pub fn worker_count(&self, jobs: usize) -> usize {
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        self.max_concurrency.unwrap_or(hardware).min(jobs).max(1)
    }

    /// Delay before the retry that follows attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
