//! Docker container runtime implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ExecInspectResponse, HostConfig};
use bytes::Bytes;
use futures::StreamExt;
use prole_core::container::*;
use prole_core::{Error, Result};
use std::future::Future;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Inspections made once a process's output closes before giving up on its
/// exit code.
const EXIT_POLL_ATTEMPTS: u32 = 10;
const EXIT_POLL_INITIAL_DELAY: Duration = Duration::from_millis(10);
const EXIT_POLL_MAX_DELAY: Duration = Duration::from_secs(1);

/// Keeps a container alive so processes can be exec'd into it.
const IDLE_ENTRYPOINT: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Container runtime backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    build_root: String,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub fn new(build_root: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(runtime_err)?;
        Ok(Self::with_client(docker, build_root))
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker, build_root: impl Into<String>) -> Self {
        Self {
            docker,
            build_root: build_root.into(),
        }
    }

    fn container_name() -> String {
        format!("prole-{}", uuid::Uuid::now_v7())
    }

    /// Resolve a container path against the build root. Absolute paths and
    /// trailing separators are kept as given.
    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.build_root.trim_end_matches('/'), path)
        }
    }

    async fn pull(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Pull warning");
                }
            }
        }
    }

    /// Run a process to completion, failing unless it exits 0.
    async fn run_checked(&self, handle: &ContainerHandle, spec: ProcessSpec) -> Result<()> {
        let path = spec.path.clone();
        let mut process = self.run(handle, spec).await?;

        let mut status = None;
        while let Some(message) = process.stream.next().await {
            if let ProcessStream::Exited(code) = message {
                status = Some(code);
            }
        }

        match status {
            Some(0) => Ok(()),
            Some(code) => Err(Error::Runtime(format!(
                "{} exited with status {}",
                path, code
            ))),
            None => Err(Error::Runtime(format!("{} exited without a status", path))),
        }
    }
}

fn runtime_err(e: bollard::errors::Error) -> Error {
    Error::Runtime(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> Error {
    Error::Internal(e.to_string())
}

/// Tar a host path. Directories are archived by content so they unpack
/// directly into the destination.
fn archive(src: PathBuf) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    if src.is_dir() {
        builder.append_dir_all(".", &src)?;
    } else {
        let name = src.file_name().map(PathBuf::from).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name")
        })?;
        builder.append_path_with_name(&src, name)?;
    }
    builder.into_inner()
}

fn unpack(data: Vec<u8>, dst: PathBuf) -> std::io::Result<()> {
    std::fs::create_dir_all(&dst)?;
    tar::Archive::new(Cursor::new(data)).unpack(&dst)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        let container_name = Self::container_name();

        self.pull(&spec.image).await;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(IDLE_ENTRYPOINT.iter().map(|s| s.to_string()).collect()),
            env: Some(env),
            working_dir: Some(self.build_root.clone()),
            tty: Some(false),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, image = %spec.image, "Creating container");
        self.docker
            .create_container(Some(create_options), config)
            .await
            .map_err(runtime_err)?;

        info!(container = %container_name, "Starting container");
        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(runtime_err)?;

        Ok(ContainerHandle::new(container_name))
    }

    async fn copy_in(&self, handle: &ContainerHandle, src: &str, dst: &str) -> Result<()> {
        let dst = self.resolve(dst);
        debug!(container = %handle, src = %src, dst = %dst, "Copying in");

        self.run_checked(handle, ProcessSpec::new("mkdir").arg("-p").arg(dst.clone()))
            .await?;

        let src = PathBuf::from(src);
        let tarball = tokio::task::spawn_blocking(move || archive(src))
            .await
            .map_err(join_err)??;

        let options = UploadToContainerOptions {
            path: dst,
            ..Default::default()
        };
        self.docker
            .upload_to_container(handle.as_str(), Some(options), Bytes::from(tarball))
            .await
            .map_err(runtime_err)
    }

    async fn copy_out(&self, handle: &ContainerHandle, src: &str, dst: &str) -> Result<()> {
        // "dir/." archives the directory's contents rather than the directory
        let mut path = self.resolve(src);
        if path.ends_with('/') {
            path.push('.');
        }
        debug!(container = %handle, src = %path, dst = %dst, "Copying out");

        let options = DownloadFromContainerOptions { path };
        let mut stream = self
            .docker
            .download_from_container(handle.as_str(), Some(options));

        let mut tarball = Vec::new();
        while let Some(chunk) = stream.next().await {
            tarball.extend_from_slice(&chunk.map_err(runtime_err)?);
        }

        let dst = PathBuf::from(dst);
        tokio::task::spawn_blocking(move || unpack(tarball, dst))
            .await
            .map_err(join_err)??;
        Ok(())
    }

    async fn run(&self, handle: &ContainerHandle, spec: ProcessSpec) -> Result<RunningProcess> {
        let mut cmd = vec![spec.path.clone()];
        cmd.extend(spec.args.iter().cloned());

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let options = CreateExecOptions {
            cmd: Some(cmd),
            env: Some(env),
            working_dir: Some(self.build_root.clone()),
            attach_stdin: Some(spec.stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(handle.as_str(), options)
            .await
            .map_err(runtime_err)?;

        let (mut output, mut input) = match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(runtime_err)?
        {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => {
                return Err(Error::Runtime("exec started detached".to_string()));
            }
        };

        if let Some(data) = spec.stdin {
            input.write_all(&data).await?;
            input.shutdown().await?;
        }

        let pid = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(runtime_err)?
            .pid
            .and_then(|pid| u32::try_from(pid).ok())
            .unwrap_or_default();

        info!(container = %handle, path = %spec.path, pid, "Spawned process");

        let (tx, rx) = mpsc::channel(64);
        let docker = self.docker.clone();
        let exec_id = exec.id;
        tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                let message = match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        ProcessStream::Stdout(message)
                    }
                    Ok(LogOutput::StdErr { message }) => ProcessStream::Stderr(message),
                    Ok(LogOutput::StdIn { .. }) => continue,
                    Err(e) => {
                        warn!(error = %e, "Process output error");
                        break;
                    }
                };
                if tx.send(message).await.is_err() {
                    return;
                }
            }

            match wait_for_exit(|| docker.inspect_exec(&exec_id)).await {
                Ok(Some(code)) => {
                    let status = u32::try_from(code).unwrap_or(u32::MAX);
                    let _ = tx.send(ProcessStream::Exited(status)).await;
                }
                Ok(None) => warn!(exec = %exec_id, "Process output closed but it never exited"),
                Err(e) => warn!(error = %e, "Failed to inspect exec"),
            }
        });

        Ok(RunningProcess {
            pid,
            stream: Box::pin(ReceiverStream::new(rx)),
        })
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        info!(container = %handle, "Destroying container");
        self.docker
            .remove_container(handle.as_str(), Some(options))
            .await
            .map_err(runtime_err)
    }
}

/// Inspect an exec until it reports it has stopped running, returning its
/// exit code. `Ok(None)` if it is still running after every attempt.
///
/// The output stream can close before the daemon records the exit code.
async fn wait_for_exit<F, Fut, E>(mut inspect: F) -> std::result::Result<Option<i64>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<ExecInspectResponse, E>>,
{
    let mut delay = EXIT_POLL_INITIAL_DELAY;
    for attempt in 1..=EXIT_POLL_ATTEMPTS {
        let response = inspect().await?;
        if response.running == Some(false) {
            return Ok(response.exit_code);
        }
        if attempt < EXIT_POLL_ATTEMPTS {
            debug!(attempt, ?delay, "Exec still running, retrying");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(EXIT_POLL_MAX_DELAY);
        }
    }
    Ok(None)
}
