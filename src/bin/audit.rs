use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use code_audit::config::AppConfig;
use code_audit::models::report::RunStatus;
use code_audit::models::submission::{has_allowed_extension, Submission, SubmittedFile};
use code_audit::services::gemini::GeminiClient;
use code_audit::services::orchestrator::Orchestrator;
use code_audit::services::rules::RuleCatalog;

/// Audit source files against a rule set with an LLM and print the report.
#[derive(Debug, Parser)]
#[command(name = "audit", version)]
struct Args {
    /// Files to audit
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Rule-set version (defaults to RULE_SET_VERSION)
    #[arg(long)]
    rule_set: Option<String>,

    /// Extra criteria checked in addition to the rule set
    #[arg(long)]
    criteria: Option<String>,

    /// Write the JSON report here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Maximum number of concurrent analyzer calls
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-job timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Retries per job for transient failures
    #[arg(long)]
    retries: Option<u32>,

    /// Accepted file extensions; pass an empty value to accept everything
    #[arg(long = "ext", default_value = "py", value_delimiter = ',')]
    extensions: Vec<String>,

    /// Log as JSON instead of human-readable text
    #[arg(long)]
    json_logs: bool,
}

const EXIT_STARTUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.json_logs);

    match run(args).await {
        Ok(RunStatus::AllSucceeded) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: Args) -> Result<RunStatus, Box<dyn std::error::Error>> {
    let mut config = AppConfig::from_env()?;
    if let Some(n) = args.concurrency {
        config.max_concurrency = Some(n);
    }
    if let Some(secs) = args.timeout_secs {
        config.job_timeout_secs = secs;
    }
    if let Some(retries) = args.retries {
        config.retry_limit = retries;
    }
    config.validate()?;

    let version = args
        .rule_set
        .unwrap_or_else(|| config.rule_set_version.clone());
    let mut submission = Submission::new(version);
    if let Some(criteria) = args.criteria {
        submission = submission.with_extra_criteria(criteria);
    }

    let extensions: Vec<String> = args
        .extensions
        .into_iter()
        .filter(|e| !e.trim().is_empty())
        .collect();
    for path in args.files {
        if !has_allowed_extension(&path, &extensions) {
            tracing::warn!(path = %path.display(), "Skipping file with unsupported extension");
            continue;
        }
        if !submission.push(SubmittedFile::read(&path).await) {
            tracing::debug!(path = %path.display(), "Skipping duplicate path");
        }
    }

    let analyzer = GeminiClient::new(config.analyzer())?;
    let orchestrator = Orchestrator::new(
        Arc::new(analyzer),
        RuleCatalog::builtin(),
        config.orchestrator(),
    );
    let run = orchestrator.prepare(submission)?;

    let cancel = run.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling pending jobs");
            cancel.cancel();
        }
    });

    let mut events = run.subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    job_id = %event.job_id,
                    file = %event.path.display(),
                    state = %event.state,
                    attempts = event.attempts,
                    "[{}/{}] finished",
                    event.completed,
                    event.total
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress events dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let report = run.execute().await;
    let _ = progress.await;

    let json = report.to_json()?;
    match args.output {
        Some(path) => {
            tokio::fs::write(&path, json).await?;
            tracing::info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }

    Ok(report.status)
}
