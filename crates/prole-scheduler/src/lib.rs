//! Build orchestration and scheduling.
//!
//! Drives one build through its lifecycle and publishes its events to a
//! per-build [`EventHub`](prole_core::EventHub).

pub mod builder;
pub mod fetcher;
pub mod logs;
pub mod outputter;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
mod testing;

pub use builder::BuildOrchestrator;
pub use fetcher::{FetchedInput, ResourceSourceFetcher, SourceFetcher};
pub use logs::TracingLogStreamer;
pub use outputter::{Outputter, ResourceOutputter};
pub use scheduler::{RunState, Scheduler};
pub use worker::Worker;
