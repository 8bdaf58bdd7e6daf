//! Configuration parsing for the Prole build worker.
//!
//! This crate handles parsing of:
//! - The worker configuration file (prole.kdl)
//! - The resource-type name to image map

pub mod error;
pub mod resource_types;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use resource_types::{DEFAULT_RESOURCE_TYPES, ResourceType, ResourceTypes, parse_resource_types};
pub use worker::{DEFAULT_RETAINED_BUILDS, WorkerConfig, load_worker_config, parse_worker_config};
