//! A single segment file on disk.

use super::SegmentEvents;
use chrono::{DateTime, TimeDelta, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tapedeck_common::paths::PathTemplate;
use tapedeck_common::RecordFormat;

/// Write target for one segment.
///
/// Nothing touches the filesystem until the first write, which creates the
/// parent directories and the file named after the segment start.
pub struct SegmentWriter {
    path: PathBuf,
    start_dts: TimeDelta,
    start_ntp: DateTime<Utc>,
    last_dts: TimeDelta,
    last_flush: TimeDelta,
    file: Option<BufWriter<File>>,
    events: Arc<dyn SegmentEvents>,
}

impl SegmentWriter {
    pub fn new(
        template: &PathTemplate,
        stream: &str,
        format: RecordFormat,
        start_dts: TimeDelta,
        start_ntp: DateTime<Utc>,
        events: Arc<dyn SegmentEvents>,
    ) -> Self {
        Self {
            path: template.encode(stream, start_ntp, format),
            start_dts,
            start_ntp,
            last_dts: start_dts,
            last_flush: start_dts,
            file: None,
            events,
        }
    }

    /// Reset the flush and duration bookkeeping to the segment start.
    pub fn initialize(&mut self) {
        self.last_flush = self.start_dts;
        self.last_dts = self.start_dts;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_dts(&self) -> TimeDelta {
        self.start_dts
    }

    pub fn start_ntp(&self) -> DateTime<Utc> {
        self.start_ntp
    }

    pub fn last_flush(&self) -> TimeDelta {
        self.last_flush
    }

    pub fn set_last_flush(&mut self, dts: TimeDelta) {
        self.last_flush = dts;
    }

    pub fn last_dts(&self) -> TimeDelta {
        self.last_dts
    }

    /// Record the decode time of a sample written into this segment.
    pub fn observe_dts(&mut self, dts: TimeDelta) {
        if dts > self.last_dts {
            self.last_dts = dts;
        }
    }

    /// Whether the file has been created.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Flush, stat and sync the file. Emits the completion event only when
    /// every step succeeded.
    pub fn close(mut self) -> io::Result<()> {
        let Some(mut writer) = self.file.take() else {
            return Ok(());
        };

        let flushed = writer.flush();
        let (file, _) = writer.into_parts();

        let stat = file.metadata();
        let synced = file.sync_all();
        drop(file);

        flushed?;
        let size = stat?.len();
        synced?;

        self.events
            .on_segment_complete(&self.path, self.last_dts - self.start_dts, size);
        Ok(())
    }

    fn create(&self) -> io::Result<BufWriter<File>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        self.events.on_segment_create(&self.path);
        Ok(BufWriter::new(file))
    }
}

impl Write for SegmentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = match self.file.take() {
            Some(file) => file,
            None => self.create()?,
        };
        self.file.insert(file).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file {
            Some(ref mut w) => w.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingEvents {
        pub created: Mutex<Vec<PathBuf>>,
        pub completed: Mutex<Vec<(PathBuf, TimeDelta, u64)>>,
    }

    impl SegmentEvents for RecordingEvents {
        fn on_segment_create(&self, path: &Path) {
            self.created.lock().unwrap().push(path.to_path_buf());
        }

        fn on_segment_complete(&self, path: &Path, duration: TimeDelta, size: u64) {
            self.completed
                .lock()
                .unwrap()
                .push((path.to_path_buf(), duration, size));
        }
    }

    fn writer(dir: &Path, events: Arc<RecordingEvents>) -> SegmentWriter {
        let template = PathTemplate::new(format!(
            "{}/%path/%Y-%m-%d_%H-%M-%S-%f",
            dir.display()
        ));
        let start = Utc.with_ymd_and_hms(2024, 8, 8, 17, 13, 29).unwrap();
        SegmentWriter::new(
            &template,
            "cam1",
            RecordFormat::Fmp4,
            TimeDelta::seconds(10),
            start,
            events,
        )
    }

    #[test]
    fn test_lazy_create_and_close_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(RecordingEvents::default());
        let mut seg = writer(dir.path(), events.clone());

        assert!(!seg.is_open());
        assert!(!seg.path().exists());
        assert!(events.created.lock().unwrap().is_empty());

        seg.write_all(b"hello ").unwrap();
        seg.write_all(b"world").unwrap();
        assert!(seg.is_open());
        assert_eq!(events.created.lock().unwrap().len(), 1);

        seg.observe_dts(TimeDelta::seconds(12));
        seg.observe_dts(TimeDelta::seconds(11));
        let path = seg.path().to_path_buf();
        seg.close().unwrap();

        assert_eq!(
            path,
            dir.path().join("cam1/2024-08-08_17-13-29-000000.mp4")
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        let completed = events.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, path);
        assert_eq!(completed[0].1, TimeDelta::seconds(2));
        assert_eq!(completed[0].2, 11);
    }

    #[test]
    fn test_close_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(RecordingEvents::default());
        let seg = writer(dir.path(), events.clone());
        let path = seg.path().to_path_buf();

        seg.close().unwrap();
        assert!(!path.exists());
        assert!(events.completed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_initialize_resets_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = writer(dir.path(), Arc::new(RecordingEvents::default()));
        seg.observe_dts(TimeDelta::seconds(20));
        seg.set_last_flush(TimeDelta::seconds(15));

        seg.initialize();
        assert_eq!(seg.last_dts(), TimeDelta::seconds(10));
        assert_eq!(seg.last_flush(), TimeDelta::seconds(10));
    }

    #[test]
    fn test_create_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the stream directory should be.
        std::fs::write(dir.path().join("cam1"), b"").unwrap();

        let events = Arc::new(RecordingEvents::default());
        let mut seg = writer(dir.path(), events.clone());
        assert!(seg.write_all(b"data").is_err());
        assert!(events.created.lock().unwrap().is_empty());
    }

    #[test]
    fn test_create_retried_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cam1"), b"").unwrap();

        let events = Arc::new(RecordingEvents::default());
        let mut seg = writer(dir.path(), events.clone());
        assert!(seg.write_all(b"lost").is_err());
        assert!(!seg.is_open());

        std::fs::remove_file(dir.path().join("cam1")).unwrap();
        seg.write_all(b"data").unwrap();
        seg.write_all(b"more").unwrap();
        assert!(seg.is_open());
        assert_eq!(events.created.lock().unwrap().len(), 1);

        let path = seg.path().to_path_buf();
        seg.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"datamore");
    }
}
