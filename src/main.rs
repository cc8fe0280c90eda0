//! Prediction service - Main Entry Point
//!
//! Loads the selected artifact bundle and serves `/health`, `/predict` and
//! `/admin/reload` over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tabular_risk_pipeline::{
    config::AppConfig,
    metrics::{MetricsReporter, ServingMetrics},
    models::InferenceEngine,
    server::{self, AppState},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "serve", about = "Serve predictions from a trained artifact bundle")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "TRP_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    /// Serve this run instead of the registry's choice
    #[arg(long, env = "TRP_RUN_ID")]
    run_id: Option<String>,

    /// Override the configured listen port
    #[arg(long, env = "TRP_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from_path(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(run_id) = cli.run_id {
        config.artifacts.run_id = Some(run_id);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    config
        .logging
        .init_tracing(&["tabular_risk_pipeline", "serve"])?;

    info!("Starting prediction service");
    info!(
        "Decision threshold: {:.2}, risk levels: medium>={:.2}, high>={:.2}, critical>={:.2}",
        config.detection.threshold,
        config.detection.risk_levels.medium,
        config.detection.risk_levels.high,
        config.detection.risk_levels.critical
    );

    let engine = Arc::new(InferenceEngine::from_config(&config));
    match engine.reload(None) {
        Ok(bundle) => info!(
            run_id = %bundle.run_id,
            features = bundle.vectorizer.len(),
            "Serving bundle"
        ),
        Err(e) => warn!(
            error = %e,
            "No bundle loaded at startup; /predict returns 503 until /admin/reload succeeds"
        ),
    }

    let metrics = Arc::new(ServingMetrics::new());
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let app = server::router(AppState::new(engine, metrics.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Prediction service shutting down...");
    metrics.print_summary();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
