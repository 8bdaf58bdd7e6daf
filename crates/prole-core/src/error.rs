//! Error types for Prole.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An error reported by the container runtime, surfaced verbatim.
    #[error("{0}")]
    Runtime(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("resource {resource_type}: {message}")]
    Resource {
        resource_type: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
