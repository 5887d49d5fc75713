//! Gemini client against an in-process fake of the generateContent endpoint

mod fixtures;
mod helpers;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use code_audit::config::{AnalyzerConfig, OrchestratorConfig};
use code_audit::models::failure::FailureKind;
use code_audit::models::job::{FileSnapshot, JobId};
use code_audit::models::report::RunStatus;
use code_audit::services::analyzer::{AnalysisRequest, AnalyzerClient};
use code_audit::services::gemini::GeminiClient;
use code_audit::services::orchestrator::Orchestrator;
use code_audit::services::rules::{RuleCatalog, DEFAULT_RULE_SET};

#[derive(Clone)]
struct Reply {
    status: StatusCode,
    headers: Vec<(&'static str, &'static str)>,
    body: String,
    delay: Duration,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: vec![],
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    fn status(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            headers: vec![],
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct FakeGemini {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(HeaderMap, Value)>>,
}

async fn generate_content(
    State(fake): State<Arc<FakeGemini>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, HeaderMap, String) {
    fake.requests.lock().unwrap().push((headers, body));
    let reply = fake
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Reply::status(StatusCode::INTERNAL_SERVER_ERROR, "script exhausted"));

    tokio::time::sleep(reply.delay).await;
    let mut out = HeaderMap::new();
    for (name, value) in reply.headers {
        out.insert(name, HeaderValue::from_static(value));
    }
    (reply.status, out, reply.body)
}

async fn spawn_fake(replies: Vec<Reply>) -> (Arc<FakeGemini>, String) {
    let fake = Arc::new(FakeGemini {
        replies: Mutex::new(replies.into()),
        ..Default::default()
    });
    let app = Router::new()
        .route("/v1beta/models/{*action}", post(generate_content))
        .with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (fake, format!("http://{addr}"))
}

fn client(base_url: &str) -> GeminiClient {
    GeminiClient::new(AnalyzerConfig {
        api_key: "test-key".to_string(),
        model: "gemini-test".to_string(),
        base_url: base_url.to_string(),
        temperature: 0.2,
        top_p: 0.95,
        top_k: 40,
        max_output_tokens: 2048,
    })
    .unwrap()
}

fn request(timeout: Duration) -> AnalysisRequest {
    let rule_set = RuleCatalog::builtin().get(DEFAULT_RULE_SET).unwrap();
    AnalysisRequest {
        job_id: JobId(0),
        file: FileSnapshot::new("app/orders.py", fixtures::ORDERS_PY),
        rule_set,
        timeout,
    }
}

fn candidate(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn test_successful_response_parsed_into_verdict() {
    let req = request(Duration::from_secs(5));
    let text = fixtures::response_for(&req.rule_set, "FAIL");
    let (fake, base) = spawn_fake(vec![Reply::ok(candidate(&text))]).await;

    let verdict = client(&base).analyze(&req).await.unwrap();

    assert_eq!(verdict.job_id, JobId(0));
    assert_eq!(verdict.rule_results.len(), req.rule_set.rules.len());
    assert_eq!(verdict.failed_rules().count(), req.rule_set.rules.len());

    let requests = fake.requests.lock().unwrap();
    let (headers, body) = &requests[0];
    assert_eq!(headers.get("x-goog-api-key").unwrap(), "test-key");
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.contains("def total(orders):"));
    assert!(body["systemInstruction"]["parts"][0]["text"].is_string());
    assert_eq!(body["generationConfig"]["topK"], 40);
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
}

#[tokio::test]
async fn test_http_errors_classified() {
    let mut limited = Reply::status(StatusCode::TOO_MANY_REQUESTS, "quota");
    limited.headers.push(("retry-after", "7"));
    let (_fake, base) = spawn_fake(vec![
        Reply::status(StatusCode::UNAUTHORIZED, "bad key"),
        limited,
        Reply::status(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
        Reply::ok(json!({ "candidates": [] })),
        Reply::ok(candidate("   ")),
    ])
    .await;
    let client = client(&base);
    let req = request(Duration::from_secs(5));

    let auth = client.analyze(&req).await.unwrap_err();
    assert_eq!(auth.kind(), FailureKind::AuthError);
    assert!(!auth.is_retriable());

    let rate = client.analyze(&req).await.unwrap_err();
    assert_eq!(rate.kind(), FailureKind::RateLimited);
    assert_eq!(rate.retry_after(), Some(Duration::from_secs(7)));

    let unavailable = client.analyze(&req).await.unwrap_err();
    assert_eq!(unavailable.kind(), FailureKind::NetworkError);
    assert!(unavailable.is_retriable());

    let empty = client.analyze(&req).await.unwrap_err();
    assert_eq!(empty.kind(), FailureKind::MalformedResponse);

    let blank = client.analyze(&req).await.unwrap_err();
    assert_eq!(blank.kind(), FailureKind::MalformedResponse);
}

#[tokio::test]
async fn test_unparseable_text_is_malformed_with_raw_text() {
    let (_fake, base) = spawn_fake(vec![Reply::ok(candidate(fixtures::GARBAGE_RESPONSE))]).await;

    let err = client(&base).analyze(&request(Duration::from_secs(5))).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::MalformedResponse);
    let failure = err.into_failure(&code_audit::models::job::AnalysisJob::new(
        JobId(0),
        FileSnapshot::new("app/orders.py", fixtures::ORDERS_PY),
        DEFAULT_RULE_SET,
    ));
    assert_eq!(failure.raw_text.as_deref(), Some(fixtures::GARBAGE_RESPONSE));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let mut slow = Reply::ok(json!({}));
    slow.delay = Duration::from_secs(2);
    let (_fake, base) = spawn_fake(vec![slow]).await;

    let err = client(&base)
        .analyze(&request(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
}

#[tokio::test]
async fn test_orchestrated_run_recovers_from_rate_limit() {
    let rule_set = RuleCatalog::builtin().get(DEFAULT_RULE_SET).unwrap();
    let text = fixtures::response_for(&rule_set, "PASS");
    let (fake, base) = spawn_fake(vec![
        Reply::status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
        Reply::ok(candidate(&text)),
    ])
    .await;

    let config = OrchestratorConfig {
        max_concurrency: Some(1),
        job_timeout: Duration::from_secs(5),
        retry_limit: 2,
        malformed_retry_limit: 1,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        rate_limit_pause: Duration::from_millis(50),
    };
    let orchestrator = Orchestrator::new(Arc::new(client(&base)), RuleCatalog::builtin(), config)
        .with_clock(Arc::new(helpers::FixedClock));

    let report = orchestrator
        .run(helpers::submission([("orders.py", fixtures::ORDERS_PY)]))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::AllSucceeded);
    assert_eq!(report.entries[0].job.attempts, 2);
    assert_eq!(fake.requests.lock().unwrap().len(), 2);
}
