//! Core domain types and traits for the Prole build worker.
//!
//! This crate contains:
//! - Build identifiers, build specifications and outcomes
//! - Build events and the replayable [`EventHub`]
//! - Container runtime, resource tracker and log streamer capabilities

pub mod build;
pub mod container;
pub mod error;
pub mod event;
pub mod hub;
pub mod id;
pub mod logs;
pub mod resource;

pub use build::{
    Build, BuildConfig, BuildError, BuildOutcome, BuildState, BuildStatus, Input, InputConfig,
    Output, RunConfig, Version,
};
pub use error::{Error, Result};
pub use event::BuildEvent;
pub use hub::{EventHub, Subscription};
pub use id::BuildId;
