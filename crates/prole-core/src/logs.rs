//! Log streamer capability.

use std::sync::Arc;

use crate::build::Build;

/// Sink for a process's captured output.
pub trait LogStreamer: Send + Sync {
    fn stdout(&self, data: &[u8]);

    fn stderr(&self, data: &[u8]);

    /// Emit anything still buffered.
    fn flush(&self);
}

/// Builds the log streamer for one build.
pub type LogStreamerFactory = Arc<dyn Fn(&Build) -> Arc<dyn LogStreamer> + Send + Sync>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogStreamer;

impl LogStreamer for NullLogStreamer {
    fn stdout(&self, _data: &[u8]) {}

    fn stderr(&self, _data: &[u8]) {}

    fn flush(&self) {}
}
