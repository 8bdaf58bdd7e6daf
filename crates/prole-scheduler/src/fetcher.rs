//! Source acquisition for build inputs.

use async_trait::async_trait;
use prole_core::logs::LogStreamer;
use prole_core::resource::ResourceTracker;
use prole_core::{BuildId, Input, Result, Version};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// An input fetched onto the host.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedInput {
    pub path: PathBuf,
    pub version: Version,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch one input of a build onto the host.
    async fn fetch(
        &self,
        build: BuildId,
        input: &Input,
        logs: Arc<dyn LogStreamer>,
    ) -> Result<FetchedInput>;

    /// Remove anything fetched for a build.
    async fn cleanup(&self, _build: BuildId) {}
}

/// Fetches inputs through their resource type.
pub struct ResourceSourceFetcher {
    tracker: Arc<dyn ResourceTracker>,
    work_dir: PathBuf,
}

impl ResourceSourceFetcher {
    pub fn new(tracker: Arc<dyn ResourceTracker>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracker,
            work_dir: work_dir.into(),
        }
    }

    fn build_dir(&self, build: BuildId) -> PathBuf {
        self.work_dir.join(build.to_string())
    }
}

#[async_trait]
impl SourceFetcher for ResourceSourceFetcher {
    async fn fetch(
        &self,
        build: BuildId,
        input: &Input,
        logs: Arc<dyn LogStreamer>,
    ) -> Result<FetchedInput> {
        let name = input.dir_name();
        let dest = self.build_dir(build).join(name);
        tokio::fs::create_dir_all(&dest).await?;

        info!(build = %build, input = %name, resource_type = %input.resource_type, "Fetching input");
        let resource = self.tracker.init(&input.resource_type, logs, None).await?;
        let fetched = resource.fetch(input, &dest).await;
        self.tracker.release(resource).await;

        Ok(FetchedInput {
            path: dest,
            version: fetched?,
        })
    }

    async fn cleanup(&self, build: BuildId) {
        let dir = self.build_dir(build);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(build = %build, dir = %dir.display(), error = %e, "Failed to clean up inputs"),
        }
    }
}
