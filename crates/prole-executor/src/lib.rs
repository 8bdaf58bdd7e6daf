//! Container runtime and resource tracker backends.
//!
//! Provides:
//! - A Docker-backed [`ContainerRuntime`]
//! - A [`ResourceTracker`] that runs resource types as containers

pub mod docker;
pub mod tracker;

pub use docker::DockerRuntime;
pub use tracker::ContainerResourceTracker;

pub use prole_core::container::{
    ContainerHandle, ContainerRuntime, ContainerSpec, LogStream, ProcessSpec, ProcessStream,
    RunningProcess,
};
pub use prole_core::resource::{Resource, ResourceTracker};
