//! Resource-type capability.
//!
//! A resource type knows how to check for new versions of an external
//! artifact, fetch ("in") a version, and produce ("out") a new one.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::Result;
use crate::build::{Input, Output, Version};
use crate::container::ContainerHandle;
use crate::logs::LogStreamer;

/// Environment handed to a resource when it is initialized.
pub type Params = BTreeMap<String, String>;

/// An initialized resource-type handle.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Identifier assigned by the tracker that initialized this handle.
    fn id(&self) -> &str;

    /// The resource type this handle was initialized for.
    fn resource_type(&self) -> &str;

    /// Discover versions of the input's source, newest last.
    async fn check(&self, input: &Input) -> Result<Vec<Version>>;

    /// Fetch the input into `dest` on the host, returning the fetched version.
    async fn fetch(&self, input: &Input, dest: &Path) -> Result<Version>;

    /// Produce the output from the build container, returning the versions created.
    async fn put(&self, container: &ContainerHandle, output: &Output) -> Result<Vec<Version>>;
}

/// Acquires and releases resource-type handles.
///
/// Every successful `init` must be paired with exactly one `release`.
#[async_trait]
pub trait ResourceTracker: Send + Sync {
    async fn init(
        &self,
        resource_type: &str,
        logs: Arc<dyn LogStreamer>,
        params: Option<Params>,
    ) -> Result<Box<dyn Resource>>;

    async fn release(&self, resource: Box<dyn Resource>);
}
