//! Wiring of a Docker-backed worker from its configuration.

use prole_config::WorkerConfig;
use prole_core::Result;
use prole_core::container::ContainerRuntime;
use prole_core::logs::LogStreamerFactory;
use prole_core::resource::ResourceTracker;
use prole_executor::{ContainerResourceTracker, DockerRuntime};
use std::sync::Arc;
use tracing::debug;

use crate::builder::BuildOrchestrator;
use crate::fetcher::ResourceSourceFetcher;
use crate::outputter::ResourceOutputter;
use crate::scheduler::Scheduler;

/// The runtime, resource tracker and orchestrator of one worker.
pub struct Worker {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub tracker: Arc<dyn ResourceTracker>,
    pub orchestrator: Arc<BuildOrchestrator>,
    retained_builds: usize,
}

impl Worker {
    /// Connect to the local Docker daemon and wire a worker around it.
    pub fn connect(config: &WorkerConfig, log_streamers: LogStreamerFactory) -> Result<Self> {
        let runtime = Arc::new(DockerRuntime::new(config.build_root.clone())?);
        debug!(build_root = %config.build_root, "Connected to Docker");
        Ok(Self::with_runtime(config, runtime, log_streamers))
    }

    pub fn with_runtime(
        config: &WorkerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        log_streamers: LogStreamerFactory,
    ) -> Self {
        let tracker: Arc<dyn ResourceTracker> = Arc::new(ContainerResourceTracker::new(
            runtime.clone(),
            config.resource_types.clone(),
            config.scratch_dir(),
        ));
        let orchestrator = BuildOrchestrator::new(
            Arc::new(ResourceSourceFetcher::new(tracker.clone(), config.builds_dir())),
            Arc::new(ResourceOutputter::new(tracker.clone())),
            runtime.clone(),
            log_streamers,
        )
        .keep_containers(config.keep_containers);

        debug!(
            runtime = runtime.name(),
            work_dir = %config.work_dir.display(),
            resource_types = config.resource_types.len(),
            "Worker ready"
        );
        Self {
            runtime,
            tracker,
            orchestrator: Arc::new(orchestrator),
            retained_builds: config.retained_builds,
        }
    }

    /// A scheduler running builds on this worker.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.orchestrator.clone()).with_retention(self.retained_builds)
    }
}
