mod config;
mod metrics;
mod stats;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use logtap::telemetry::{CONTEXT_ERROR, REQUEST, TIME_LAG};
use logtap::{Drain, DrainConfig};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::{DemoConfig, LogFormat, ServerConfig},
    metrics::DrainMetrics,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Phase 1: thread-local subscriber while configuration loads
    let basic_tracing = init_tracing_basic();

    info!("Starting logtap demo v{}", env!("CARGO_PKG_VERSION"));

    let config = DemoConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    // Phase 2: global subscriber honouring logging.level and logging.format
    drop(basic_tracing);
    init_tracing_from_config(&config);

    let addr = config.socket_addr()?;

    let metrics = DrainMetrics::new(config.drain.log_metrics);
    let sink = stats::spawn(&config.stats);
    let drain = Drain::new(DrainConfig::with_sink(sink).with_telemetry(metrics.clone()));

    let app = build_router(Arc::new(drain), metrics.clone(), &config.server);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("  - Drain endpoint: POST http://{}/", addr);
    info!("  - Health check: http://{}/health", addr);
    info!("  - Metrics: http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let lag = metrics.value_of(TIME_LAG);
    info!(
        requests = metrics.count_of(REQUEST),
        context_errors = metrics.count_of(CONTEXT_ERROR),
        records = lag.map_or(0, |v| v.samples),
        max_lag_secs = lag.map_or(0.0, |v| v.max),
        "Server shut down gracefully"
    );
    Ok(())
}

fn build_router(drain: Arc<Drain<()>>, metrics: DrainMetrics, server: &ServerConfig) -> Router {
    let request_timeout = Duration::from_secs(server.request_timeout_secs);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        .merge(logtap::routes(drain))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Drain bodies are streamed, so the limit has to wrap the body itself.
                // Outside the timeout: Timeout needs a `Default` response body.
                .layer(RequestBodyLimitLayer::new(server.max_body_bytes))
                .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout)),
        )
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler(State(metrics): State<DrainMetrics>) -> impl IntoResponse {
    Json(metrics.snapshot())
}

/// Phase 1: basic tracing so configuration loading can log.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,logtap=debug,logtap_demo=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: global subscriber built from configuration.
fn init_tracing_from_config(config: &DemoConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
