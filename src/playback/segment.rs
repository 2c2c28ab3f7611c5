//! Recorded segments and the requested playback window.

use super::{PlaybackError, Result};
use crate::inventory::RecordingDescriptor;
use chrono::{DateTime, TimeDelta, Utc};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tapedeck_media::Fmp4Reader;

/// One closed segment file and the instant its first sample was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    pub start: DateTime<Utc>,
}

impl Segment {
    pub fn new(path: impl Into<PathBuf>, start: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            start,
        }
    }

    /// Open the file and read its init.
    pub fn open(&self) -> tapedeck_media::Result<Fmp4Reader<BufReader<File>>> {
        let file = File::open(&self.path)?;
        Fmp4Reader::new(BufReader::new(file))
    }
}

impl TryFrom<&RecordingDescriptor> for Segment {
    type Error = PlaybackError;

    fn try_from(rec: &RecordingDescriptor) -> Result<Self> {
        let start = DateTime::parse_from_rfc3339(&rec.start)
            .map_err(|e| PlaybackError::InvalidDescriptor(format!("{}: {}", rec.start, e)))?;
        Ok(Self::new(&rec.path, start.with_timezone(&Utc)))
    }
}

/// The part of the timeline a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackWindow {
    pub start: DateTime<Utc>,
    pub duration: TimeDelta,
}

impl PlaybackWindow {
    pub fn new(start: DateTime<Utc>, duration: TimeDelta) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_descriptor_offsets_normalized_to_utc() {
        let rec = RecordingDescriptor {
            path: "/rec/cam1/a.mp4".to_string(),
            duration: 60.0,
            start: "2024-08-08T17:13:29.437452-03:00".to_string(),
        };
        let seg = Segment::try_from(&rec).unwrap();
        assert_eq!(seg.path, PathBuf::from("/rec/cam1/a.mp4"));
        assert_eq!(
            seg.start,
            Utc.with_ymd_and_hms(2024, 8, 8, 20, 13, 29).unwrap() + TimeDelta::microseconds(437_452)
        );
    }

    #[test]
    fn test_descriptor_bad_start() {
        let rec = RecordingDescriptor {
            path: "/rec/a.mp4".to_string(),
            duration: 1.0,
            start: "yesterday".to_string(),
        };
        assert!(matches!(
            Segment::try_from(&rec),
            Err(PlaybackError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let seg = Segment::new("/nonexistent/segment.mp4", Utc::now());
        assert!(matches!(seg.open(), Err(e) if e.is_io()));
    }

    #[test]
    fn test_window_end() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let window = PlaybackWindow::new(start, TimeDelta::seconds(90));
        assert_eq!(window.end(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap());
    }
}
