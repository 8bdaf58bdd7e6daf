//! Application state.

use prole_core::resource::ResourceTracker;
use prole_scheduler::Scheduler;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// Used directly by one-off version checks.
    pub tracker: Arc<dyn ResourceTracker>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, tracker: Arc<dyn ResourceTracker>) -> Self {
        Self { scheduler, tracker }
    }
}
