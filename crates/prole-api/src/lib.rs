//! HTTP API server for the Prole build worker.
//!
//! Accepts builds, reports their state, streams their events over WebSocket,
//! and runs one-off resource checks.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testing;

pub use state::AppState;
