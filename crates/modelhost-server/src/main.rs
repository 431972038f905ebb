//! ModelHost Server
//!
//! Serves processor plugins over HTTP: register a plugin directory under a
//! model name, run inference against it, take it offline again.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use modelhost_server::config::LoggingConfig;
use modelhost_server::{create_router, preload_models, AppState, ConfigOverrides, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "modelhost-server")]
#[command(about = "ModelHost processor plugin server", long_about = None)]
struct Cli {
    /// Configuration file path (defaults to modelhost.yaml when present)
    #[arg(short, long, env = "MODELHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        listen: cli.listen.clone(),
        port: cli.port,
        verbose: cli.verbose,
    };
    let config = ServerConfig::load(cli.config.as_deref(), &overrides)?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_tracing(&config.logging, cli.verbose);

    info!("Starting ModelHost server");

    let metrics_handle = init_metrics()?;

    let state = AppState::with_default_plugins(Some(metrics_handle))?;
    info!(
        "Processor kinds: [{}]",
        state.service.registry().plugins().kinds().join(", ")
    );

    if !config.preload.is_empty() {
        let loaded = preload_models(&state, &config).await;
        info!("Preloaded {}/{} model(s)", loaded, config.preload.len());
    }

    let addr: SocketAddr = config.listen_addr().parse()?;
    let app = create_router(state, config.server.body_limit);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("ModelHost listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            warn!("Shutdown signal received, stopping server...");
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging, optionally to a daily rolling file
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let filter = if verbose {
        EnvFilter::new(&logging.level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let (writer, guard) = match &logging.dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "modelhost.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let layer = match (writer, logging.json) {
        (Some(writer), true) => fmt::layer().json().with_writer(writer).boxed(),
        (Some(writer), false) => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
        (None, true) => fmt::layer().json().boxed(),
        (None, false) => fmt::layer().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();

    if let Some(dir) = &logging.dir {
        info!("File logging enabled to {}/modelhost.log", dir.display());
    }
    guard
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "modelhost_requests_total",
        "Total number of requests by endpoint"
    );
    metrics::describe_counter!("modelhost_errors_total", "Total number of error envelopes by endpoint");
    metrics::describe_histogram!(
        "modelhost_infer_latency_us",
        metrics::Unit::Microseconds,
        "Inference latency in microseconds by model"
    );
    metrics::describe_gauge!("modelhost_models_registered", "Number of registered models");

    info!("Metrics exporter initialized");
    Ok(handle)
}
