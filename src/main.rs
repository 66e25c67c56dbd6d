//! Threat Detection Service - Main Entry Point
//!
//! Loads the classifier and feature schema, then serves the detection API.

use anyhow::{Context, Result};
use std::sync::Arc;
use threat_detection_service::{
    api::{build_router, AppState, RouterOptions},
    config::{AppConfig, LogFormat, LoggingConfig},
    metrics::{DetectionMetrics, MetricsReporter},
    models::{inference::InferenceEngine, loader::ArtifactLoader},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!("Starting Threat Detection Service");
    info!(
        model = %config.artifacts.model_path().display(),
        schema = %config.artifacts.schema_path().display(),
        remote = config.artifacts.remote_base_url.as_deref().unwrap_or("none"),
        "Configuration loaded successfully"
    );

    // Artifacts must be resident before the listener is bound
    let loader = ArtifactLoader::new(config.artifacts.clone())?;
    let bundle = match loader.load().await {
        Ok(bundle) => bundle,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to load model artifacts");
            return Err(e.context("Startup aborted"));
        }
    };
    info!(loaded_at = %bundle.loaded_at.to_rfc3339(), "Model artifacts loaded");

    let engine = Arc::new(InferenceEngine::from_bundle(bundle));
    let metrics = Arc::new(DetectionMetrics::new());

    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let options = RouterOptions {
        max_upload_bytes: config.server.max_upload_bytes,
        cors_origins: config.server.cors_origins.clone(),
    };
    let app = build_router(AppState::new(engine, metrics.clone()), &options);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Detection API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Service shutting down...");
    metrics.log_summary();

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("threat_detection_service={0},threat_detector={0},tower_http={0}", logging.level)))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
