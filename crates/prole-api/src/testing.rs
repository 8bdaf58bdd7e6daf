//! Fakes and an app harness for router tests.

use async_trait::async_trait;
use prole_core::container::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ProcessSpec, ProcessStream, RunningProcess,
};
use prole_core::logs::LogStreamer;
use prole_core::resource::{Params, Resource, ResourceTracker};
use prole_core::{Error, Input, Output, Result, Version};
use prole_scheduler::{
    BuildOrchestrator, ResourceOutputter, ResourceSourceFetcher, Scheduler, TracingLogStreamer,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::AppState;

pub fn version(value: &str) -> Version {
    let mut version = Version::new();
    version.insert("ref".to_string(), value.to_string());
    version
}

/// Runtime whose processes print one line and exit with `exit_status`.
pub struct FakeRuntime {
    pub exit_status: u32,
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, _spec: ContainerSpec) -> Result<ContainerHandle> {
        Ok(ContainerHandle::new("some-handle"))
    }

    async fn copy_in(&self, _handle: &ContainerHandle, _src: &str, _dst: &str) -> Result<()> {
        Ok(())
    }

    async fn copy_out(&self, _handle: &ContainerHandle, _src: &str, _dst: &str) -> Result<()> {
        Ok(())
    }

    async fn run(&self, _handle: &ContainerHandle, _spec: ProcessSpec) -> Result<RunningProcess> {
        let messages = vec![
            ProcessStream::Stdout(bytes::Bytes::from_static(b"hello\n")),
            ProcessStream::Exited(self.exit_status),
        ];
        Ok(RunningProcess {
            pid: 7,
            stream: Box::pin(futures::stream::iter(messages)),
        })
    }

    async fn destroy(&self, _handle: &ContainerHandle) -> Result<()> {
        Ok(())
    }
}

/// Tracker for checks. Type "unknown" fails to init; type "broken" fails to check.
#[derive(Default)]
pub struct FakeTracker {
    pub checked: Mutex<Vec<Input>>,
    pub released: AtomicUsize,
}

impl FakeTracker {
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeResource {
    resource_type: String,
    tracker: Arc<FakeTracker>,
}

#[async_trait]
impl Resource for FakeResource {
    fn id(&self) -> &str {
        "fake-resource"
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    async fn check(&self, input: &Input) -> Result<Vec<Version>> {
        self.tracker.checked.lock().unwrap().push(input.clone());
        if self.resource_type == "broken" {
            return Err(Error::Resource {
                resource_type: self.resource_type.clone(),
                message: "check exited with status 1".to_string(),
            });
        }
        Ok(vec![version("abc"), version("def")])
    }

    async fn fetch(&self, _input: &Input, _dest: &Path) -> Result<Version> {
        Ok(version("fetched"))
    }

    async fn put(&self, _container: &ContainerHandle, _output: &Output) -> Result<Vec<Version>> {
        Ok(vec![version("put")])
    }
}

/// Shares one [`FakeTracker`] with the resources it hands out.
pub struct SharedTracker(pub Arc<FakeTracker>);

#[async_trait]
impl ResourceTracker for SharedTracker {
    async fn init(
        &self,
        resource_type: &str,
        _logs: Arc<dyn LogStreamer>,
        _params: Option<Params>,
    ) -> Result<Box<dyn Resource>> {
        if resource_type == "unknown" {
            return Err(Error::NotFound(format!(
                "unknown resource type: {}",
                resource_type
            )));
        }
        Ok(Box::new(FakeResource {
            resource_type: resource_type.to_string(),
            tracker: self.0.clone(),
        }))
    }

    async fn release(&self, _resource: Box<dyn Resource>) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestApp {
    pub state: AppState,
    pub tracker: Arc<FakeTracker>,
    _work_dir: TempDir,
}

pub fn test_app(exit_status: u32) -> TestApp {
    let work_dir = tempfile::tempdir().unwrap();
    let tracker = Arc::new(FakeTracker::default());
    let shared: Arc<dyn ResourceTracker> = Arc::new(SharedTracker(tracker.clone()));

    let orchestrator = BuildOrchestrator::new(
        Arc::new(ResourceSourceFetcher::new(shared.clone(), work_dir.path())),
        Arc::new(ResourceOutputter::new(shared.clone())),
        Arc::new(FakeRuntime { exit_status }),
        TracingLogStreamer::factory(),
    );
    let scheduler = Arc::new(Scheduler::new(Arc::new(orchestrator)));

    TestApp {
        state: AppState::new(scheduler, shared),
        tracker,
        _work_dir: work_dir,
    }
}
