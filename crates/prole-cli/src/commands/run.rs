//! Local build execution command.

use anyhow::{Context, Result};
use prole_config::WorkerConfig;
use prole_core::container::LogStream;
use prole_core::{Build, BuildEvent, EventHub};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run a build locally using Docker, printing its events as they happen.
pub async fn run_local(build_path: &Path, config: &WorkerConfig, keep_container: bool) -> Result<()> {
    let content = std::fs::read_to_string(build_path)
        .with_context(|| format!("Failed to read build file: {}", build_path.display()))?;
    let build: Build = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse build file: {}", build_path.display()))?;

    println!("Running build {}", build.guid);
    println!("Image: {}", build.config.image);
    println!("Inputs: {}", build.inputs.len());

    let config = WorkerConfig {
        keep_containers: keep_container || config.keep_containers,
        ..config.clone()
    };
    // output is printed from the event stream
    let worker = super::connect(&config, super::quiet_logs())?;

    println!("\n--- Starting build ---\n");

    let hub = Arc::new(EventHub::new());
    let mut events = hub.follow(0, CancellationToken::new());
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let outcome = worker.orchestrator.build(&build, hub).await;
    printer.await.context("Event printer task failed")?;

    match outcome.into_result() {
        Ok(true) => {
            println!("\n✓ Build succeeded!");
            Ok(())
        }
        Ok(false) => anyhow::bail!("Build failed"),
        Err(e) => anyhow::bail!("Build errored while {}: {}", e.state, e),
    }
}

fn print_event(event: &BuildEvent) {
    match event {
        BuildEvent::InputFetched { name, version } => {
            println!("▶ Fetched input '{}' {:?}", name, version);
        }
        BuildEvent::ContainerCreated { handle } => {
            println!("▶ Created container {}", handle);
        }
        BuildEvent::InputsStaged => println!("▶ Inputs staged"),
        BuildEvent::ProcessStarted { pid } => println!("▶ Script started (pid {})\n", pid),
        BuildEvent::Log { origin, payload } => match origin {
            LogStream::Stdout => {
                print!("{}", payload);
                let _ = std::io::stdout().flush();
            }
            LogStream::Stderr => eprint!("{}", payload),
        },
        BuildEvent::Exited { status } => println!("\n▶ Script exited with status {}", status),
        BuildEvent::OutputProduced { name, version } => {
            println!("▶ Produced output '{}' {:?}", name, version);
        }
        BuildEvent::Errored { message } => println!("✗ {}", message),
        BuildEvent::Finished { status } => println!("--- Build finished: {:?} ---", status),
    }
}
