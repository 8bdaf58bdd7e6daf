//! Build specifications and outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::{BuildId, Error};

const DEFAULT_INPUT_NAME: &str = "source";

/// A resource version, e.g. `{"ref": "abc123"}`.
pub type Version = BTreeMap<String, String>;

/// A build submitted to the worker. Immutable once started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub guid: BuildId,
    /// Run the build container with elevated privileges.
    #[serde(default)]
    pub privileged: bool,
    pub config: BuildConfig,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl Build {
    /// Path inside the container that an input is staged at.
    pub fn destination_for<'a>(&'a self, input: &'a Input) -> &'a str {
        self.config.destination_for(input)
    }
}

/// How the build runs: image, environment and script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub image: String,
    /// Environment variables for the build script.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
}

impl BuildConfig {
    /// Path inside the container that an input is staged at.
    ///
    /// A mapping in this config takes precedence over the input's own
    /// destination; an input with neither lands in a directory named after it.
    pub fn destination_for<'a>(&'a self, input: &'a Input) -> &'a str {
        self.inputs
            .iter()
            .find(|mapping| mapping.name == input.name)
            .map(|mapping| mapping.path.as_str())
            .or_else(|| (!input.destination.is_empty()).then_some(input.destination.as_str()))
            .unwrap_or(input.dir_name())
    }

    /// Layer `other` on top of this config.
    ///
    /// Params merge key-wise with `other` winning. Image, run and inputs are
    /// replaced wholesale when `other` sets them.
    pub fn merge(&self, other: &BuildConfig) -> BuildConfig {
        let mut params = self.params.clone();
        params.extend(other.params.clone());

        BuildConfig {
            image: if other.image.is_empty() {
                self.image.clone()
            } else {
                other.image.clone()
            },
            params,
            run: if other.run.path.is_empty() {
                self.run.clone()
            } else {
                other.run.clone()
            },
            inputs: if other.inputs.is_empty() {
                self.inputs.clone()
            } else {
                other.inputs.clone()
            },
        }
    }
}

/// The script to execute inside the build container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Maps a named input to a path inside the build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    pub name: String,
    pub path: String,
}

/// A resource fetched before the build runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub source: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Path inside the build container, relative to the build root.
    #[serde(default)]
    pub destination: String,
    /// Build config file inside the fetched input, layered over the
    /// submitted config before the container is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

impl Input {
    /// Directory name the input is fetched into. Unnamed inputs use `source`.
    pub fn dir_name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_INPUT_NAME
        } else {
            &self.name
        }
    }
}

/// A resource produced from the build container after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub source: serde_json::Value,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Path inside the build container handed to the resource's "out".
    #[serde(default)]
    pub source_path: String,
}

/// States of the build state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    FetchingSource,
    CreatingContainer,
    StagingInputs,
    Running,
    Evaluating,
    Succeeded,
    Failed,
    ExtractingOutputs,
    Errored,
    Done,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Pending => "pending",
            BuildState::FetchingSource => "fetching_source",
            BuildState::CreatingContainer => "creating_container",
            BuildState::StagingInputs => "staging_inputs",
            BuildState::Running => "running",
            BuildState::Evaluating => "evaluating",
            BuildState::Succeeded => "succeeded",
            BuildState::Failed => "failed",
            BuildState::ExtractingOutputs => "extracting_outputs",
            BuildState::Errored => "errored",
            BuildState::Done => "done",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded,
    Failed,
    Errored,
}

/// A failure of one orchestration step. Displays as the underlying error.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct BuildError {
    /// The state the build was in when the step failed.
    pub state: BuildState,
    pub source: Error,
}

impl BuildError {
    pub fn new(state: BuildState, source: Error) -> Self {
        Self { state, source }
    }
}

/// Result of one build run.
///
/// A script that ran and exited non-zero is `Completed { succeeded: false }`;
/// only failures around the script are `Errored`.
#[derive(Debug)]
pub enum BuildOutcome {
    Completed { succeeded: bool },
    Errored(BuildError),
}

impl BuildOutcome {
    pub fn status(&self) -> BuildStatus {
        match self {
            BuildOutcome::Completed { succeeded: true } => BuildStatus::Succeeded,
            BuildOutcome::Completed { succeeded: false } => BuildStatus::Failed,
            BuildOutcome::Errored(_) => BuildStatus::Errored,
        }
    }

    pub fn error(&self) -> Option<&BuildError> {
        match self {
            BuildOutcome::Errored(err) => Some(err),
            BuildOutcome::Completed { .. } => None,
        }
    }

    /// The `(succeeded, error)` view: `Ok(bool)` when the script ran to
    /// completion, `Err` when orchestration failed.
    pub fn into_result(self) -> std::result::Result<bool, BuildError> {
        match self {
            BuildOutcome::Completed { succeeded } => Ok(succeeded),
            BuildOutcome::Errored(err) => Err(err),
        }
    }
}
