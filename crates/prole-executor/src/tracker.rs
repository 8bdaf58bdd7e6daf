//! Resource tracker that runs resource types as containers.
//!
//! Each resource type maps to an image providing `/opt/resource/check`,
//! `/opt/resource/in` and `/opt/resource/out`. Scripts receive a JSON request
//! on stdin and answer with JSON on stdout; stderr is forwarded to the log
//! streamer.

use async_trait::async_trait;
use futures::StreamExt;
use prole_config::ResourceTypes;
use prole_core::container::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ProcessSpec, ProcessStream,
    with_trailing_slash,
};
use prole_core::logs::LogStreamer;
use prole_core::resource::{Params, Resource, ResourceTracker};
use prole_core::{Error, Input, Output, Result, Version};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const CHECK_SCRIPT: &str = "/opt/resource/check";
const IN_SCRIPT: &str = "/opt/resource/in";
const OUT_SCRIPT: &str = "/opt/resource/out";

/// Directory inside the resource container that "in" and "out" operate on.
const RESOURCE_DIR: &str = "src";

/// Tracks resource containers from `init` until `release`.
pub struct ContainerResourceTracker {
    runtime: Arc<dyn ContainerRuntime>,
    types: ResourceTypes,
    scratch_dir: PathBuf,
    active: Mutex<HashMap<String, ContainerHandle>>,
}

impl ContainerResourceTracker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        types: ResourceTypes,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            types,
            scratch_dir: scratch_dir.into(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Number of resources initialized and not yet released.
    pub fn active(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ResourceTracker for ContainerResourceTracker {
    async fn init(
        &self,
        resource_type: &str,
        logs: Arc<dyn LogStreamer>,
        params: Option<Params>,
    ) -> Result<Box<dyn Resource>> {
        let image = self
            .types
            .image_for(resource_type)
            .ok_or_else(|| Error::NotFound(format!("unknown resource type: {}", resource_type)))?;

        let handle = self
            .runtime
            .create(ContainerSpec {
                image: image.to_string(),
                env: params.unwrap_or_default(),
                privileged: false,
            })
            .await?;

        info!(resource_type = %resource_type, container = %handle, "Initialized resource");
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.to_string(), handle.clone());

        Ok(Box::new(ContainerResource {
            runtime: self.runtime.clone(),
            handle,
            resource_type: resource_type.to_string(),
            logs,
            scratch_dir: self.scratch_dir.clone(),
        }))
    }

    async fn release(&self, resource: Box<dyn Resource>) {
        let handle = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource.id());

        match handle {
            Some(handle) => {
                if let Err(e) = self.runtime.destroy(&handle).await {
                    warn!(container = %handle, error = %e, "Failed to destroy resource container");
                }
            }
            None => warn!(id = %resource.id(), "Released unknown resource"),
        }
    }
}

/// A resource type running in its own container.
struct ContainerResource {
    runtime: Arc<dyn ContainerRuntime>,
    handle: ContainerHandle,
    resource_type: String,
    logs: Arc<dyn LogStreamer>,
    scratch_dir: PathBuf,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: Version,
}

impl ContainerResource {
    fn err(&self, message: impl Into<String>) -> Error {
        Error::Resource {
            resource_type: self.resource_type.clone(),
            message: message.into(),
        }
    }

    /// Run a resource script with `request` on stdin, returning its stdout.
    async fn run_script(
        &self,
        script: &str,
        args: &[&str],
        request: serde_json::Value,
    ) -> Result<Vec<u8>> {
        let mut spec = ProcessSpec::new(script).stdin(serde_json::to_vec(&request)?);
        spec.args = args.iter().map(|a| a.to_string()).collect();

        debug!(resource_type = %self.resource_type, script = %script, "Running resource script");
        let mut process = self.runtime.run(&self.handle, spec).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(message) = process.stream.next().await {
            match message {
                ProcessStream::Stdout(data) => stdout.extend_from_slice(&data),
                ProcessStream::Stderr(data) => {
                    self.logs.stderr(&data);
                    stderr.extend_from_slice(&data);
                }
                ProcessStream::Exited(0) => {
                    self.logs.flush();
                    return Ok(stdout);
                }
                ProcessStream::Exited(status) => {
                    self.logs.flush();
                    return Err(self.err(format!(
                        "{} exited with status {}: {}",
                        script,
                        status,
                        String::from_utf8_lossy(&stderr).trim()
                    )));
                }
            }
        }

        self.logs.flush();
        Err(self.err(format!("{} exited without a status", script)))
    }

    fn parse<T: for<'de> Deserialize<'de>>(&self, script: &str, stdout: &[u8]) -> Result<T> {
        serde_json::from_slice(stdout)
            .map_err(|e| self.err(format!("invalid response from {}: {}", script, e)))
    }
}

#[async_trait]
impl Resource for ContainerResource {
    fn id(&self) -> &str {
        self.handle.as_str()
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    async fn check(&self, input: &Input) -> Result<Vec<Version>> {
        let request = json!({ "source": input.source, "version": input.version });
        let stdout = self.run_script(CHECK_SCRIPT, &[], request).await?;
        self.parse(CHECK_SCRIPT, &stdout)
    }

    async fn fetch(&self, input: &Input, dest: &Path) -> Result<Version> {
        let request = json!({
            "source": input.source,
            "version": input.version,
            "params": input.params,
        });
        let stdout = self.run_script(IN_SCRIPT, &[RESOURCE_DIR], request).await?;
        let response: VersionResponse = self.parse(IN_SCRIPT, &stdout)?;

        self.runtime
            .copy_out(
                &self.handle,
                &with_trailing_slash(RESOURCE_DIR),
                &dest.to_string_lossy(),
            )
            .await?;

        Ok(response.version)
    }

    async fn put(&self, container: &ContainerHandle, output: &Output) -> Result<Vec<Version>> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let staging = tempfile::Builder::new()
            .prefix("prole-out-")
            .tempdir_in(&self.scratch_dir)?;
        let staging_path = staging.path().to_string_lossy().into_owned();

        let source_path = if output.source_path.is_empty() {
            "."
        } else {
            output.source_path.as_str()
        };

        self.runtime
            .copy_out(container, &with_trailing_slash(source_path), &staging_path)
            .await?;
        self.runtime
            .copy_in(
                &self.handle,
                &with_trailing_slash(&staging_path),
                &with_trailing_slash(RESOURCE_DIR),
            )
            .await?;

        let request = json!({ "source": output.source, "params": output.params });
        let stdout = self.run_script(OUT_SCRIPT, &[RESOURCE_DIR], request).await?;
        let response: VersionResponse = self.parse(OUT_SCRIPT, &stdout)?;

        Ok(vec![response.version])
    }
}
