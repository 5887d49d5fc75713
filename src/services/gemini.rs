use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::AnalyzerConfig;
use crate::models::verdict::Verdict;
use crate::services::analyzer::{AnalysisRequest, AnalyzerClient, AnalyzerError};
use crate::services::parser;
use crate::services::prompt::build_audit_prompt;

/// Client for the Google Generative Language `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    config: AnalyzerConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(config: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let http = Client::builder()
            .user_agent(concat!("code-audit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalyzerError::Network {
                message: format!("failed to build HTTP client: {e}"),
                retriable: false,
            })?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        )
    }

    /// Send the prompt and return the model's text.
    async fn generate(&self, request: &AnalysisRequest) -> Result<String, AnalyzerError> {
        let prompt = build_audit_prompt(&request.file, &request.rule_set);

        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &prompt.system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &prompt.user_content,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "text/plain",
            },
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, request.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport_error(e, request.timeout))?;

        if !status.is_success() {
            return Err(classify_status(status, &headers, &text, request.timeout));
        }

        extract_text(&text)
    }
}

#[async_trait]
impl AnalyzerClient for GeminiClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Verdict, AnalyzerError> {
        let start = Instant::now();
        let text = self.generate(request).await?;

        tracing::debug!(
            job_id = %request.job_id,
            model = %self.config.model,
            chars = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model response received"
        );

        parser::parse_verdict(request.job_id, &text, &request.rule_set, Utc::now()).map_err(|e| {
            AnalyzerError::Malformed {
                reason: e.to_string(),
                raw_text: text,
            }
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> AnalyzerError {
    if e.is_timeout() {
        AnalyzerError::Timeout(timeout)
    } else if e.is_decode() {
        AnalyzerError::Malformed {
            reason: format!("unreadable response body: {e}"),
            raw_text: String::new(),
        }
    } else {
        AnalyzerError::Network {
            message: e.to_string(),
            retriable: true,
        }
    }
}

/// Map a non-success HTTP status onto the failure taxonomy.
pub(crate) fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    timeout: Duration,
) -> AnalyzerError {
    let snippet: String = body.chars().take(300).collect();
    match status.as_u16() {
        401 | 403 => AnalyzerError::Auth(format!("HTTP {}: {}", status.as_u16(), snippet)),
        // The API reports a bad key as 400 INVALID_ARGUMENT.
        400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
            AnalyzerError::Auth(format!("HTTP 400: {snippet}"))
        }
        408 => AnalyzerError::Timeout(timeout),
        429 => AnalyzerError::RateLimited {
            message: snippet,
            retry_after: retry_after_header(headers).or_else(|| retry_delay_in_body(body)),
        },
        500..=599 => AnalyzerError::Network {
            message: format!("server error HTTP {}: {}", status.as_u16(), snippet),
            retriable: true,
        },
        code => AnalyzerError::Network {
            message: format!("request rejected with HTTP {code}: {snippet}"),
            retriable: false,
        },
    }
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn retry_delay_in_body(body: &str) -> Option<Duration> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).expect("valid retryDelay regex")
    });
    let secs: f64 = re.captures(body)?[1].parse().ok()?;
    Some(Duration::from_secs_f64(secs))
}

/// Pull the candidate text out of a successful response body.
pub(crate) fn extract_text(body: &str) -> Result<String, AnalyzerError> {
    let malformed = |reason: String| AnalyzerError::Malformed {
        reason,
        raw_text: body.to_string(),
    };

    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(malformed(format!("prompt blocked: {reason}")));
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| malformed("response has no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let finish = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(malformed(format!("empty response (finish reason {finish})")));
    }

    Ok(text.trim().to_string())
}
