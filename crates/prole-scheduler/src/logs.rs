//! Log streamer that writes build output through `tracing`.

use prole_core::logs::{LogStreamer, LogStreamerFactory};
use prole_core::{Build, BuildId};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Longest line held back waiting for a newline. Longer runs of output are
/// emitted in pieces of this size.
const MAX_LINE: usize = 64 * 1024;

/// Emits one `tracing` event per complete output line.
///
/// Partial lines are held back until their newline arrives, they reach
/// `MAX_LINE` bytes, or the streamer is flushed.
pub struct TracingLogStreamer {
    build: BuildId,
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
}

impl TracingLogStreamer {
    pub fn new(build: BuildId) -> Self {
        Self {
            build,
            stdout: Mutex::new(Vec::new()),
            stderr: Mutex::new(Vec::new()),
        }
    }

    /// Factory producing one streamer per build.
    pub fn factory() -> LogStreamerFactory {
        Arc::new(|build: &Build| Arc::new(TracingLogStreamer::new(build.guid)) as Arc<dyn LogStreamer>)
    }

    fn write(&self, stream: &'static str, buffer: &Mutex<Vec<u8>>, data: &[u8]) {
        let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(data);
        for line in take_lines(&mut buffer) {
            info!(build = %self.build, stream, "{}", line);
        }
    }

    fn drain(&self, stream: &'static str, buffer: &Mutex<Vec<u8>>) {
        let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if !buffer.is_empty() {
            let rest = String::from_utf8_lossy(&buffer).into_owned();
            buffer.clear();
            info!(build = %self.build, stream, "{}", rest);
        }
    }
}

impl LogStreamer for TracingLogStreamer {
    fn stdout(&self, data: &[u8]) {
        self.write("stdout", &self.stdout, data);
    }

    fn stderr(&self, data: &[u8]) {
        self.write("stderr", &self.stderr, data);
    }

    fn flush(&self) {
        self.drain("stdout", &self.stdout);
        self.drain("stderr", &self.stderr);
    }
}

/// Split complete lines off the front of `buffer`, leaving a partial line
/// shorter than `MAX_LINE`.
fn take_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(last) = buffer.iter().rposition(|b| *b == b'\n') {
        let rest = buffer.split_off(last + 1);
        let complete = std::mem::replace(buffer, rest);
        lines.extend(complete[..complete.len() - 1].split(|b| *b == b'\n').map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        }));
    }

    if buffer.len() >= MAX_LINE {
        let tail = buffer.len() % MAX_LINE;
        let rest = buffer.split_off(buffer.len() - tail);
        let forced = std::mem::replace(buffer, rest);
        lines.extend(
            forced
                .chunks(MAX_LINE)
                .map(|chunk| String::from_utf8_lossy(chunk).into_owned()),
        );
    }

    lines
}
