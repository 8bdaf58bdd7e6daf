//! One-off resource check command.

use anyhow::{Context, Result};
use prole_config::WorkerConfig;
use prole_core::Input;
use prole_core::logs::NullLogStreamer;
use serde_json::{Value, json};
use std::sync::Arc;

/// Run a resource's check and print the versions it reports.
pub async fn check(
    config: &WorkerConfig,
    resource_type: &str,
    source: &str,
    version: Option<&str>,
) -> Result<()> {
    let source: Value = serde_json::from_str(source).context("Source is not valid JSON")?;
    let version: Option<Value> = version
        .map(serde_json::from_str)
        .transpose()
        .context("Version is not valid JSON")?;

    let input: Input = serde_json::from_value(json!({
        "type": resource_type,
        "source": source,
        "version": version,
    }))
    .context("Invalid check request")?;

    let tracker = super::connect(config, super::quiet_logs())?.tracker;
    let resource = tracker
        .init(resource_type, Arc::new(NullLogStreamer), None)
        .await
        .with_context(|| format!("Failed to initialize resource type '{}'", resource_type))?;

    let versions = resource.check(&input).await;
    tracker.release(resource).await;
    let versions = versions.context("Check failed")?;

    println!("{}", serde_json::to_string_pretty(&versions)?);
    Ok(())
}
