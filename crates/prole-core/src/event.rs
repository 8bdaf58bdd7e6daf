//! Events emitted during a build.

use serde::{Deserialize, Serialize};

use crate::build::{BuildStatus, Version};
use crate::container::LogStream;

/// One observable occurrence in a build's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    InputFetched { name: String, version: Version },
    ContainerCreated { handle: String },
    InputsStaged,
    ProcessStarted { pid: u32 },
    Log { origin: LogStream, payload: String },
    Exited { status: u32 },
    OutputProduced { name: String, version: Version },
    Errored { message: String },
    Finished { status: BuildStatus },
}

impl BuildEvent {
    pub fn log(origin: LogStream, data: &[u8]) -> Self {
        BuildEvent::Log {
            origin,
            payload: String::from_utf8_lossy(data).into_owned(),
        }
    }
}
