use anyhow::Context;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod engine;
mod error;
mod explainer;
mod features;
mod forest;
mod types;

use config::Config;
use engine::PredictionEngine;
use error::AppError;
use types::{FeatureVector, PredictResponse, UrlPredictRequest, UrlPredictResponse};

type AppState = Arc<PredictionEngine>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phishguard_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    info!("Loaded configuration: {:?}", config);

    // Load model and background data; failure here is fatal and the
    // listener never binds.
    let engine = PredictionEngine::new(&config)
        .context("failed to initialize prediction engine from persisted artifacts")?;
    let app_state = Arc::new(engine);

    // Initialize metrics exporter
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .expect("Failed to install Prometheus exporter");

    // Build router
    let app = build_router(app_state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting PhishGuard prediction service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .route("/predict/url", post(predict_url_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Welcome to the PhishGuard phishing detection API. POST a feature vector to /predict or a raw URL to /predict/url."
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn predict_handler(
    State(engine): State<AppState>,
    Json(features): Json<FeatureVector>,
) -> Result<Json<PredictResponse>, AppError> {
    let start = Instant::now();

    metrics::counter!("predict_requests_total", 1);

    let result = engine.predict(&features)?;

    let latency = start.elapsed().as_millis() as f64;
    metrics::histogram!("predict_duration_ms", latency);

    Ok(Json(result))
}

async fn predict_url_handler(
    State(engine): State<AppState>,
    Json(request): Json<UrlPredictRequest>,
) -> Result<Json<UrlPredictResponse>, AppError> {
    let start = Instant::now();

    metrics::counter!("predict_url_requests_total", 1);

    let result = engine.predict_url(&request.url)?;

    let latency = start.elapsed().as_millis() as f64;
    metrics::histogram!("predict_duration_ms", latency);

    Ok(Json(result))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal received, starting graceful shutdown");
}
