//! Prole build worker API server.

use anyhow::Context;
use clap::Parser;
use prole_api::{AppState, routes};
use prole_config::{WorkerConfig, load_worker_config, parse_resource_types};
use prole_scheduler::{TracingLogStreamer, Worker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prole-server")]
#[command(about = "Prole build worker API server", long_about = None)]
struct Args {
    /// Worker configuration file (KDL)
    #[arg(long, env = "PROLE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "PROLE_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Map of resource type names to images, as JSON
    #[arg(long, env = "PROLE_RESOURCE_TYPES")]
    resource_types: Option<String>,

    /// Host directory fetched inputs are written to
    #[arg(long, env = "PROLE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Leave build containers in place after builds finish
    #[arg(long)]
    keep_containers: bool,

    /// Emit logs as JSON
    #[arg(long, env = "PROLE_LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = load_config(&args)?;
    info!(
        listen = %config.listen_addr,
        work_dir = %config.work_dir.display(),
        resource_types = config.resource_types.len(),
        "Loaded worker configuration"
    );

    let worker = Worker::connect(&config, TracingLogStreamer::factory())
        .context("Failed to connect to Docker")?;
    let scheduler = Arc::new(worker.scheduler());

    let app = routes::router(AppState::new(scheduler.clone(), worker.tracker))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Starting server on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.drain().await;
    info!("Server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Config file first, then command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<WorkerConfig> {
    let mut config = match &args.config {
        Some(path) => load_worker_config(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => WorkerConfig::default(),
    };

    if let Some(addr) = &args.listen_addr {
        config.listen_addr = addr.clone();
    }
    if let Some(dir) = &args.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(json) = &args.resource_types {
        let types = parse_resource_types(json).context("Invalid --resource-types")?;
        config.resource_types = config.resource_types.merge(&types);
    }
    if args.keep_containers {
        config.keep_containers = true;
    }

    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining builds");
}
