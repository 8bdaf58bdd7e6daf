//! Container runtime capability.
//!
//! A runtime provisions isolated containers, moves files in and out of them
//! and runs processes inside them.

use async_trait::async_trait;
use bytes::Bytes;
use derive_more::Display;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;

/// Specification for a container to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference, e.g. `alpine:3.20`.
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub privileged: bool,
}

/// Runtime-specific identifier of a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A process to spawn inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub path: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Bytes written to the process's stdin before it is closed.
    pub stdin: Option<Bytes>,
}

impl ProcessSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, data: impl Into<Bytes>) -> Self {
        self.stdin = Some(data.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One message from a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStream {
    Stdout(Bytes),
    Stderr(Bytes),
    /// Final message; nothing follows it.
    Exited(u32),
}

/// A spawned process and its output stream.
pub struct RunningProcess {
    pub pid: u32,
    pub stream: BoxStream<'static, ProcessStream>,
}

/// Trait for container runtimes.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Name of this runtime.
    fn name(&self) -> &'static str;

    /// Create and start a new container.
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle>;

    /// Copy a host path into the container. A trailing `/` on both paths
    /// copies directory contents.
    async fn copy_in(&self, handle: &ContainerHandle, src: &str, dst: &str) -> Result<()>;

    /// Copy a container path out to the host.
    async fn copy_out(&self, handle: &ContainerHandle, src: &str, dst: &str) -> Result<()>;

    /// Spawn a process inside the container.
    async fn run(&self, handle: &ContainerHandle, spec: ProcessSpec) -> Result<RunningProcess>;

    /// Destroy the container.
    async fn destroy(&self, handle: &ContainerHandle) -> Result<()>;
}

/// Normalize a path to end in exactly one `/`, giving "copy directory
/// contents" semantics regardless of what the caller supplied.
pub fn with_trailing_slash(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_added() {
        assert_eq!(with_trailing_slash("/path/on/disk"), "/path/on/disk/");
        assert_eq!(with_trailing_slash("some/source/path"), "some/source/path/");
    }

    #[test]
    fn test_trailing_slash_is_not_doubled() {
        assert_eq!(with_trailing_slash("some/path/"), "some/path/");
        assert_eq!(with_trailing_slash("some/path//"), "some/path/");
    }

    #[test]
    fn test_process_spec_builder() {
        let spec = ProcessSpec::new("/opt/resource/in")
            .arg("/tmp/build/src")
            .stdin(&b"{}"[..]);
        assert_eq!(spec.path, "/opt/resource/in");
        assert_eq!(spec.args, vec!["/tmp/build/src"]);
        assert_eq!(spec.stdin, Some(Bytes::from_static(b"{}")));
    }
}
