//! Code Audit
//!
//! Fans a batch of source files out to an LLM analyzer, one job per file,
//! with bounded concurrency, per-job timeouts, and retry with backoff. Each
//! model response is parsed into per-rule verdicts and collected into an
//! order-stable run report. Served over HTTP by the `code-audit` binary and
//! from the command line by `audit`.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
