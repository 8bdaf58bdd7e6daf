//! CLI command implementations.

pub mod check;
pub mod run;

use anyhow::{Context, Result};
use prole_config::{WorkerConfig, load_worker_config};
use prole_core::Build;
use prole_core::logs::{LogStreamer, LogStreamerFactory, NullLogStreamer};
use prole_scheduler::Worker;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Load the worker config, or defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => load_worker_config(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => Ok(WorkerConfig::default()),
    }
}

/// Connect to Docker and wire up the worker.
pub fn connect(config: &WorkerConfig, log_streamers: LogStreamerFactory) -> Result<Worker> {
    let worker = Worker::connect(config, log_streamers).context("Failed to connect to Docker")?;
    debug!(
        build_root = %config.build_root,
        resource_types = config.resource_types.len(),
        "Connected to Docker"
    );
    Ok(worker)
}

/// Log streamer factory for commands that print output themselves.
pub fn quiet_logs() -> LogStreamerFactory {
    Arc::new(|_build: &Build| Arc::new(NullLogStreamer) as Arc<dyn LogStreamer>)
}

pub fn validate(path: &Path) -> Result<()> {
    match load_worker_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen:       {}", config.listen_addr);
            println!("  work dir:     {}", config.work_dir.display());
            println!("  build root:   {}", config.build_root);
            println!("  retain:       {} builds", config.retained_builds);
            for rt in config.resource_types.iter() {
                println!("  resource:     {} -> {}", rt.name, rt.image);
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("Configuration error: {}", e),
    }
}
