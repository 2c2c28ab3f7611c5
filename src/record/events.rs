//! Segment lifecycle notifications.

use chrono::TimeDelta;
use std::path::Path;
use tapedeck_common::time::as_secs_f64;

/// Receives segment lifecycle callbacks from the recorder.
pub trait SegmentEvents: Send + Sync {
    /// A segment file was created and is about to receive its first bytes.
    fn on_segment_create(&self, path: &Path);

    /// A segment file was closed successfully.
    fn on_segment_complete(&self, path: &Path, duration: TimeDelta, size: u64);
}

/// Logs segment events through `tracing`.
#[derive(Debug, Clone)]
pub struct LogEvents {
    stream: String,
}

impl LogEvents {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
        }
    }
}

impl SegmentEvents for LogEvents {
    fn on_segment_create(&self, path: &Path) {
        tracing::info!(stream = %self.stream, path = %path.display(), "creating segment");
    }

    fn on_segment_complete(&self, path: &Path, duration: TimeDelta, size: u64) {
        tracing::info!(
            stream = %self.stream,
            path = %path.display(),
            duration_secs = as_secs_f64(duration),
            size,
            "segment complete"
        );
    }
}
