//! Hand-written fakes for the capability traits.

use async_trait::async_trait;
use prole_core::container::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ProcessSpec, ProcessStream, RunningProcess,
};
use prole_core::logs::LogStreamer;
use prole_core::resource::{Params, Resource, ResourceTracker};
use prole_core::{BuildId, Error, Input, Output, Result, Version};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::fetcher::{FetchedInput, SourceFetcher};
use crate::outputter::Outputter;

pub fn version(value: &str) -> Version {
    let mut version = Version::new();
    version.insert("ref".to_string(), value.to_string());
    version
}

#[derive(Default)]
struct TrackerState {
    initialized: Vec<String>,
    released: usize,
    put_into: Vec<ContainerHandle>,
}

/// Tracker whose resources succeed unless told otherwise. Type "unknown" fails to init.
#[derive(Default)]
pub struct FakeTracker {
    state: Arc<Mutex<TrackerState>>,
    fetch_error: Option<String>,
    put_error: Option<String>,
}

impl FakeTracker {
    pub fn failing_fetch(message: &str) -> Self {
        Self {
            fetch_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn failing_put(message: &str) -> Self {
        Self {
            put_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn initialized(&self) -> Vec<String> {
        self.state.lock().unwrap().initialized.clone()
    }

    pub fn released(&self) -> usize {
        self.state.lock().unwrap().released
    }

    pub fn put_into(&self) -> Vec<ContainerHandle> {
        self.state.lock().unwrap().put_into.clone()
    }
}

struct FakeResource {
    id: String,
    resource_type: String,
    state: Arc<Mutex<TrackerState>>,
    fetch_error: Option<String>,
    put_error: Option<String>,
}

#[async_trait]
impl Resource for FakeResource {
    fn id(&self) -> &str {
        &self.id
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    async fn check(&self, _input: &Input) -> Result<Vec<Version>> {
        Ok(vec![version("checked")])
    }

    async fn fetch(&self, _input: &Input, _dest: &Path) -> Result<Version> {
        match &self.fetch_error {
            Some(message) => Err(Error::Runtime(message.clone())),
            None => Ok(version("fetched")),
        }
    }

    async fn put(&self, container: &ContainerHandle, _output: &Output) -> Result<Vec<Version>> {
        self.state.lock().unwrap().put_into.push(container.clone());
        match &self.put_error {
            Some(message) => Err(Error::Runtime(message.clone())),
            None => Ok(vec![version("put")]),
        }
    }
}

#[async_trait]
impl ResourceTracker for FakeTracker {
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

        let mut state = self.state.lock().unwrap();
        state.initialized.push(resource_type.to_string());
        Ok(Box::new(FakeResource {
            id: format!("resource-{}", state.initialized.len()),
            resource_type: resource_type.to_string(),
            state: self.state.clone(),
            fetch_error: self.fetch_error.clone(),
            put_error: self.put_error.clone(),
        }))
    }

    async fn release(&self, _resource: Box<dyn Resource>) {
        self.state.lock().unwrap().released += 1;
    }
}

/// Container runtime recording every call.
pub struct FakeRuntime {
    pub create_error: Mutex<Option<String>>,
    pub copy_in_error: Mutex<Option<String>>,
    pub run_error: Mutex<Option<String>>,
    /// Messages the next spawned process yields.
    pub process_stream: Mutex<Vec<ProcessStream>>,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub copied_in: Mutex<Vec<(ContainerHandle, String, String)>>,
    pub spawned: Mutex<Vec<(ContainerHandle, ProcessSpec)>>,
    pub destroyed: Mutex<Vec<ContainerHandle>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            create_error: Mutex::new(None),
            copy_in_error: Mutex::new(None),
            run_error: Mutex::new(None),
            process_stream: Mutex::new(vec![ProcessStream::Exited(0)]),
            created: Mutex::new(Vec::new()),
            copied_in: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRuntime {
    pub fn primed(stream: Vec<ProcessStream>) -> Self {
        let runtime = Self::default();
        *runtime.process_stream.lock().unwrap() = stream;
        runtime
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        if let Some(message) = self.create_error.lock().unwrap().clone() {
            return Err(Error::Runtime(message));
        }
        self.created.lock().unwrap().push(spec);
        Ok(ContainerHandle::new("some-handle"))
    }

    async fn copy_in(&self, handle: &ContainerHandle, src: &str, dst: &str) -> Result<()> {
        if let Some(message) = self.copy_in_error.lock().unwrap().clone() {
            return Err(Error::Runtime(message));
        }
        self.copied_in
            .lock()
            .unwrap()
            .push((handle.clone(), src.to_string(), dst.to_string()));
        Ok(())
    }

    async fn copy_out(&self, _handle: &ContainerHandle, _src: &str, _dst: &str) -> Result<()> {
        Ok(())
    }

    async fn run(&self, handle: &ContainerHandle, spec: ProcessSpec) -> Result<RunningProcess> {
        if let Some(message) = self.run_error.lock().unwrap().clone() {
            return Err(Error::Runtime(message));
        }
        self.spawned.lock().unwrap().push((handle.clone(), spec));
        let messages = self.process_stream.lock().unwrap().clone();
        Ok(RunningProcess {
            pid: 42,
            stream: Box::pin(futures::stream::iter(messages)),
        })
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<()> {
        self.destroyed.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

/// Source fetcher returning a fixed path.
pub struct FakeFetcher {
    pub fetch_result: Mutex<PathBuf>,
    pub fetch_error: Mutex<Option<String>>,
    pub fetched: Mutex<Vec<Input>>,
    pub cleaned: Mutex<Vec<BuildId>>,
}

impl Default for FakeFetcher {
    fn default() -> Self {
        Self {
            fetch_result: Mutex::new(PathBuf::from("/some/fetched/path")),
            fetch_error: Mutex::new(None),
            fetched: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _build: BuildId,
        input: &Input,
        _logs: Arc<dyn LogStreamer>,
    ) -> Result<FetchedInput> {
        self.fetched.lock().unwrap().push(input.clone());
        if let Some(message) = self.fetch_error.lock().unwrap().clone() {
            return Err(Error::Runtime(message));
        }
        Ok(FetchedInput {
            path: self.fetch_result.lock().unwrap().clone(),
            version: version("fetched"),
        })
    }

    async fn cleanup(&self, build: BuildId) {
        self.cleaned.lock().unwrap().push(build);
    }
}

/// Outputter producing fixed versions.
pub struct FakeOutputter {
    pub versions: Mutex<Vec<Version>>,
    pub error: Mutex<Option<String>>,
    pub extracted: Mutex<Vec<(ContainerHandle, String)>>,
}

impl Default for FakeOutputter {
    fn default() -> Self {
        Self {
            versions: Mutex::new(vec![version("v1")]),
            error: Mutex::new(None),
            extracted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Outputter for FakeOutputter {
    async fn extract(
        &self,
        container: &ContainerHandle,
        output: &Output,
        _logs: Arc<dyn LogStreamer>,
    ) -> Result<Vec<Version>> {
        self.extracted
            .lock()
            .unwrap()
            .push((container.clone(), output.name.clone()));
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(Error::Runtime(message));
        }
        Ok(self.versions.lock().unwrap().clone())
    }
}

/// Log streamer buffering everything it receives.
#[derive(Default)]
pub struct FakeLogStreamer {
    pub stdout: Mutex<Vec<u8>>,
    pub stderr: Mutex<Vec<u8>>,
    pub flushes: Mutex<usize>,
}

impl FakeLogStreamer {
    pub fn stdout_string(&self) -> String {
        String::from_utf8(self.stdout.lock().unwrap().clone()).unwrap()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8(self.stderr.lock().unwrap().clone()).unwrap()
    }

    pub fn flushes(&self) -> usize {
        *self.flushes.lock().unwrap()
    }
}

impl LogStreamer for FakeLogStreamer {
    fn stdout(&self, data: &[u8]) {
        self.stdout.lock().unwrap().extend_from_slice(data);
    }

    fn stderr(&self, data: &[u8]) {
        self.stderr.lock().unwrap().extend_from_slice(data);
    }

    fn flush(&self) {
        *self.flushes.lock().unwrap() += 1;
    }
}
