//! Build orchestrator - drives one build from source fetch to outputs.
//!
//! ```text
//! Pending -> FetchingSource -> CreatingContainer -> StagingInputs -> Running
//!   -> Evaluating -> Succeeded -> ExtractingOutputs -> Done
//!                 -> Failed -> Done
//! any step -> Errored -> Done
//! ```
//!
//! Every transition that matters to an observer is published to the build's
//! hub, and the hub is closed exactly once when the build reaches `Done`.

use futures::StreamExt;
use futures::stream::BoxStream;
use prole_core::container::{
    ContainerHandle, ContainerRuntime, ContainerSpec, LogStream, ProcessSpec, ProcessStream,
    with_trailing_slash,
};
use prole_core::logs::{LogStreamer, LogStreamerFactory};
use prole_core::{
    Build, BuildConfig, BuildError, BuildEvent, BuildOutcome, BuildState, Error, EventHub, Input,
    Result,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::fetcher::SourceFetcher;
use crate::outputter::Outputter;

/// Orchestrates the execution of builds.
pub struct BuildOrchestrator {
    fetcher: Arc<dyn SourceFetcher>,
    outputter: Arc<dyn Outputter>,
    runtime: Arc<dyn ContainerRuntime>,
    log_streamers: LogStreamerFactory,
    keep_containers: bool,
}

/// Mutable progress of one build run.
struct Progress<'a> {
    build: &'a Build,
    state: BuildState,
    container: Option<ContainerHandle>,
}

impl Progress<'_> {
    fn enter(&mut self, next: BuildState) {
        debug!(build = %self.build.guid, from = %self.state, to = %next, "Build transition");
        self.state = next;
    }

    fn fail(&self, source: Error) -> BuildError {
        BuildError::new(self.state, source)
    }
}

impl BuildOrchestrator {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        outputter: Arc<dyn Outputter>,
        runtime: Arc<dyn ContainerRuntime>,
        log_streamers: LogStreamerFactory,
    ) -> Self {
        Self {
            fetcher,
            outputter,
            runtime,
            log_streamers,
            keep_containers: false,
        }
    }

    /// Leave build containers in place once the build is done.
    pub fn keep_containers(mut self, keep: bool) -> Self {
        self.keep_containers = keep;
        self
    }

    /// Run `build` to completion, publishing its events to `hub`.
    ///
    /// A script that exits non-zero is a completed, unsuccessful build; only
    /// failures of the steps around it are errors.
    pub async fn build(&self, build: &Build, hub: Arc<EventHub<BuildEvent>>) -> BuildOutcome {
        info!(build = %build.guid, image = %build.config.image, "Starting build");

        let logs = (self.log_streamers)(build);
        let mut progress = Progress {
            build,
            state: BuildState::Pending,
            container: None,
        };

        let outcome = match self.execute(&mut progress, &hub, logs).await {
            Ok(succeeded) => BuildOutcome::Completed { succeeded },
            Err(err) => {
                error!(build = %build.guid, state = %err.state, error = %err, "Build errored");
                progress.enter(BuildState::Errored);
                hub.emit(BuildEvent::Errored {
                    message: err.to_string(),
                });
                BuildOutcome::Errored(err)
            }
        };

        if let Some(handle) = progress.container.take() {
            if self.keep_containers {
                info!(build = %build.guid, container = %handle, "Keeping container");
            } else if let Err(e) = self.runtime.destroy(&handle).await {
                warn!(build = %build.guid, container = %handle, error = %e, "Failed to destroy container");
            }
        }
        self.fetcher.cleanup(build.guid).await;

        let status = outcome.status();
        hub.emit(BuildEvent::Finished { status });
        progress.enter(BuildState::Done);
        hub.close();

        info!(build = %build.guid, ?status, "Build finished");
        outcome
    }

    async fn execute(
        &self,
        progress: &mut Progress<'_>,
        hub: &Arc<EventHub<BuildEvent>>,
        logs: Arc<dyn LogStreamer>,
    ) -> std::result::Result<bool, BuildError> {
        let build = progress.build;

        progress.enter(BuildState::FetchingSource);
        let mut fetched: Vec<(&Input, PathBuf)> = Vec::with_capacity(build.inputs.len());
        for input in &build.inputs {
            let source = self
                .fetcher
                .fetch(build.guid, input, logs.clone())
                .await
                .map_err(|e| progress.fail(e))?;
            hub.emit(BuildEvent::InputFetched {
                name: input.name.clone(),
                version: source.version,
            });
            fetched.push((input, source.path));
        }
        let config = effective_config(build, &fetched)
            .await
            .map_err(|e| progress.fail(e))?;

        progress.enter(BuildState::CreatingContainer);
        let handle = self
            .runtime
            .create(ContainerSpec {
                image: config.image.clone(),
                env: config.params.clone(),
                privileged: build.privileged,
            })
            .await
            .map_err(|e| progress.fail(e))?;
        progress.container = Some(handle.clone());
        hub.emit(BuildEvent::ContainerCreated {
            handle: handle.to_string(),
        });

        progress.enter(BuildState::StagingInputs);
        for (input, path) in &fetched {
            let src = with_trailing_slash(&path.to_string_lossy());
            let dst = with_trailing_slash(config.destination_for(input));
            debug!(build = %build.guid, src = %src, dst = %dst, "Staging input");
            self.runtime
                .copy_in(&handle, &src, &dst)
                .await
                .map_err(|e| progress.fail(e))?;
        }
        hub.emit(BuildEvent::InputsStaged);

        progress.enter(BuildState::Running);
        let process = self
            .runtime
            .run(
                &handle,
                ProcessSpec {
                    path: config.run.path.clone(),
                    args: config.run.args.clone(),
                    env: config.params.clone(),
                    stdin: None,
                },
            )
            .await
            .map_err(|e| progress.fail(e))?;
        hub.emit(BuildEvent::ProcessStarted { pid: process.pid });
        info!(build = %build.guid, pid = process.pid, path = %config.run.path, "Running script");

        let relay = tokio::spawn(relay_output(process.stream, logs.clone(), hub.clone()));
        let exit_status = relay
            .await
            .map_err(|e| progress.fail(Error::Internal(e.to_string())))?;

        progress.enter(BuildState::Evaluating);
        logs.flush();
        let status = exit_status.ok_or_else(|| {
            progress.fail(Error::ExecutionFailed(
                "process stream ended without an exit status".to_string(),
            ))
        })?;
        hub.emit(BuildEvent::Exited { status });

        if status != 0 {
            progress.enter(BuildState::Failed);
            return Ok(false);
        }
        progress.enter(BuildState::Succeeded);

        progress.enter(BuildState::ExtractingOutputs);
        for output in &build.outputs {
            let versions = self
                .outputter
                .extract(&handle, output, logs.clone())
                .await
                .map_err(|e| progress.fail(e))?;
            for version in versions {
                hub.emit(BuildEvent::OutputProduced {
                    name: output.name.clone(),
                    version,
                });
            }
        }

        Ok(true)
    }
}

/// The submitted config with any config files carried by fetched inputs
/// layered on top, in input order.
async fn effective_config(build: &Build, fetched: &[(&Input, PathBuf)]) -> Result<BuildConfig> {
    let mut config = build.config.clone();
    for (input, path) in fetched {
        let Some(config_path) = &input.config_path else {
            continue;
        };
        let file = path.join(config_path);
        let contents = tokio::fs::read(&file).await.map_err(|e| {
            Error::InvalidInput(format!("build config {}: {}", file.display(), e))
        })?;
        let loaded: BuildConfig = serde_json::from_slice(&contents)?;
        info!(build = %build.guid, input = %input.dir_name(), file = %file.display(), "Loaded build config");
        config = config.merge(&loaded);
    }
    Ok(config)
}

/// Drain a process stream into the log streamer and the hub, in receipt
/// order, returning the exit status if one arrived.
async fn relay_output(
    mut stream: BoxStream<'static, ProcessStream>,
    logs: Arc<dyn LogStreamer>,
    hub: Arc<EventHub<BuildEvent>>,
) -> Option<u32> {
    while let Some(message) = stream.next().await {
        match message {
            ProcessStream::Stdout(data) => {
                logs.stdout(&data);
                hub.emit(BuildEvent::log(LogStream::Stdout, &data));
            }
            ProcessStream::Stderr(data) => {
                logs.stderr(&data);
                hub.emit(BuildEvent::log(LogStream::Stderr, &data));
            }
            ProcessStream::Exited(status) => return Some(status),
        }
    }
    None
}
