use super::{Inventory, RecordingDescriptor};
use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tapedeck_common::paths::PathTemplate;
use tapedeck_common::time::as_secs_f64;
use walkdir::WalkDir;

/// Lists segments by scanning the record directory of a stream.
pub struct DiskInventory {
    config: Arc<Config>,
}

impl DiskInventory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

/// Every decodable segment of `stream`, sorted by start.
pub fn scan_segments(template: &PathTemplate, stream: &str) -> Vec<(DateTime<Utc>, PathBuf)> {
    let root = template.stream_dir(stream);
    let mut found: Vec<_> = WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let start = template.decode(stream, e.path())?;
            Some((start, e.into_path()))
        })
        .collect();
    found.sort();
    found
}

/// The last segment starting at or before `start`, then every segment
/// starting before `end`.
fn select_window(
    segments: &[(DateTime<Utc>, PathBuf)],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<RecordingDescriptor> {
    let first = segments
        .iter()
        .rposition(|(s, _)| *s <= start)
        .unwrap_or(0);

    segments
        .iter()
        .enumerate()
        .skip(first)
        .take_while(|(_, (s, _))| *s < end)
        .map(|(i, (s, path))| {
            let duration = segments
                .get(i + 1)
                .map(|(next, _)| as_secs_f64(*next - *s))
                .unwrap_or(0.0);
            RecordingDescriptor {
                path: path.to_string_lossy().into_owned(),
                duration,
                start: s.to_rfc3339_opts(SecondsFormat::Micros, true),
            }
        })
        .collect()
}

#[async_trait]
impl Inventory for DiskInventory {
    async fn find_segments(
        &self,
        stream: &str,
        start: DateTime<Utc>,
        duration: TimeDelta,
    ) -> Result<Vec<RecordingDescriptor>> {
        let Some(path) = self.config.find_path(stream) else {
            return Ok(Vec::new());
        };
        let template = path.template();
        let name = stream.to_string();

        let segments = tokio::task::spawn_blocking(move || scan_segments(&template, &name))
            .await
            .context("Segment scan panicked")?;

        let selected = select_window(&segments, start, start + duration);
        tracing::debug!(
            stream,
            scanned = segments.len(),
            selected = selected.len(),
            "scanned record directory"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn segs(starts: &[i64]) -> Vec<(DateTime<Utc>, PathBuf)> {
        starts
            .iter()
            .map(|&s| (t(s), PathBuf::from(format!("/rec/{s}.mp4"))))
            .collect()
    }

    #[test]
    fn test_select_window_seeks_back_to_covering_segment() {
        let all = segs(&[0, 60, 120, 180]);
        let picked = select_window(&all, t(70), t(130));
        let paths: Vec<_> = picked.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/rec/60.mp4", "/rec/120.mp4"]);
        assert_eq!(picked[0].duration, 60.0);
        assert_eq!(picked[0].start, "2024-01-01T00:01:00.000000Z");
    }

    #[test]
    fn test_select_window_before_first_segment() {
        let all = segs(&[60, 120]);
        let picked = select_window(&all, t(0), t(30));
        assert!(picked.is_empty());

        let picked = select_window(&all, t(0), t(90));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].path, "/rec/60.mp4");
    }

    #[test]
    fn test_scan_segments_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let template = PathTemplate::new(format!(
            "{}/%path/%Y-%m-%d_%H-%M-%S-%f",
            dir.path().display()
        ));
        let stream_dir = dir.path().join("cam1");
        std::fs::create_dir_all(&stream_dir).unwrap();
        std::fs::write(stream_dir.join("2024-01-01_00-01-00-000000.mp4"), b"").unwrap();
        std::fs::write(stream_dir.join("2024-01-01_00-00-00-000000.mp4"), b"").unwrap();
        std::fs::write(stream_dir.join("notes.txt"), b"").unwrap();

        let found = scan_segments(&template, "cam1");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, t(0));
        assert_eq!(found[1].0, t(60));
    }
}
