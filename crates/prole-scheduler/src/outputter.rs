//! Output extraction after a successful build.

use async_trait::async_trait;
use prole_core::container::ContainerHandle;
use prole_core::logs::LogStreamer;
use prole_core::resource::ResourceTracker;
use prole_core::{Output, Result, Version};
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait Outputter: Send + Sync {
    /// Produce one output from the build container.
    async fn extract(
        &self,
        container: &ContainerHandle,
        output: &Output,
        logs: Arc<dyn LogStreamer>,
    ) -> Result<Vec<Version>>;
}

/// Produces outputs through their resource type's "out".
pub struct ResourceOutputter {
    tracker: Arc<dyn ResourceTracker>,
}

impl ResourceOutputter {
    pub fn new(tracker: Arc<dyn ResourceTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Outputter for ResourceOutputter {
    async fn extract(
        &self,
        container: &ContainerHandle,
        output: &Output,
        logs: Arc<dyn LogStreamer>,
    ) -> Result<Vec<Version>> {
        info!(output = %output.name, resource_type = %output.resource_type, "Extracting output");
        let resource = self.tracker.init(&output.resource_type, logs, None).await?;
        let produced = resource.put(container, output).await;
        self.tracker.release(resource).await;
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTracker, version};
    use prole_core::logs::NullLogStreamer;

    fn output() -> Output {
        serde_json::from_value(serde_json::json!({
            "name": "release",
            "type": "git",
            "source_path": "out"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_returns_versions_and_releases() {
        let tracker = Arc::new(FakeTracker::default());
        let outputter = ResourceOutputter::new(tracker.clone());

        let versions = outputter
            .extract(
                &ContainerHandle::new("some-handle"),
                &output(),
                Arc::new(NullLogStreamer),
            )
            .await
            .unwrap();

        assert_eq!(versions, vec![version("put")]);
        assert_eq!(tracker.put_into(), vec![ContainerHandle::new("some-handle")]);
        assert_eq!(tracker.released(), 1);
    }

    #[tokio::test]
    async fn test_failed_extract_still_releases() {
        let tracker = Arc::new(FakeTracker::failing_put("push rejected"));
        let outputter = ResourceOutputter::new(tracker.clone());

        let err = outputter
            .extract(
                &ContainerHandle::new("some-handle"),
                &output(),
                Arc::new(NullLogStreamer),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "push rejected");
        assert_eq!(tracker.released(), 1);
    }
}
