use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use code_audit::app_state::AppState;
use code_audit::config::AppConfig;
use code_audit::routes;
use code_audit::services::gemini::GeminiClient;
use code_audit::services::orchestrator::Orchestrator;
use code_audit::services::rules::RuleCatalog;

/// Whole-submission upload limit.
const BODY_LIMIT: usize = 32 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing code-audit server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    let analyzer_config = config.analyzer();
    tracing::info!(model = %analyzer_config.model, "Initializing Gemini client");
    let analyzer = GeminiClient::new(analyzer_config).expect("Failed to initialize Gemini client");

    let catalog = RuleCatalog::builtin();
    if catalog.get(&config.rule_set_version).is_none() {
        panic!("Unknown default rule set {:?}", config.rule_set_version);
    }

    let orchestrator = Orchestrator::new(Arc::new(analyzer), catalog, config.orchestrator());
    let state = AppState::new(orchestrator, config.rule_set_version.clone())
        .with_run_retention(config.run_retention);

    let app = routes::api_router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
