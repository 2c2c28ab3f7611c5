//! Turns a timestamped sample stream into fMP4 segment files.

use super::{SegmentEvents, SegmentWriter};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use std::io::Write;
use std::sync::Arc;
use tapedeck_common::paths::PathTemplate;
use tapedeck_common::time::to_timescale;
use tapedeck_common::RecordFormat;
use tapedeck_media::{Error, Fragment, FragmentTrack, Init, Result, Sample};

/// A sample handed to the recorder.
#[derive(Debug, Clone)]
pub struct RecordSample {
    pub payload: Bytes,
    pub cts_offset: i32,
    pub is_non_sync: bool,
}

/// Segmentation settings of one stream.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub stream: String,
    pub template: PathTemplate,
    pub segment_duration: TimeDelta,
    pub part_duration: TimeDelta,
}

struct TrackState {
    id: u32,
    timescale: u32,
    /// Last sample, waiting for the next one to learn its duration.
    pending: Option<(TimeDelta, RecordSample)>,
    last_duration: u32,
    part: Option<FragmentTrack>,
}

impl TrackState {
    fn ticks(&self, since_start: TimeDelta) -> i64 {
        to_timescale(since_start, self.timescale)
    }

    /// Move the pending sample into the current part, ending it at `end`.
    fn complete_pending(&mut self, segment_start: TimeDelta, end: Option<TimeDelta>) {
        let Some((dts, sample)) = self.pending.take() else {
            return;
        };
        let start = self.ticks(dts - segment_start);
        let duration = match end {
            Some(end) => (self.ticks(end - segment_start) - start).clamp(0, u32::MAX as i64) as u32,
            None => self.last_duration,
        };
        self.last_duration = duration;

        let part = self
            .part
            .get_or_insert_with(|| FragmentTrack::new(self.id, start.max(0) as u64));
        part.samples.push(Sample {
            duration,
            cts_offset: sample.cts_offset,
            is_non_sync: sample.is_non_sync,
            payload: sample.payload,
        });
    }
}

/// Records one stream into a sequence of segment files.
///
/// Segments start on a sync sample of the leading track and rotate on the
/// first such sample after `segment_duration`. Decode times inside a segment
/// are relative to its first sample.
pub struct Fmp4Recorder {
    config: RecorderConfig,
    init: Init,
    leading: u32,
    tracks: Vec<TrackState>,
    segment: Option<SegmentWriter>,
    init_written: bool,
    sequence_number: u32,
    events: Arc<dyn SegmentEvents>,
}

impl Fmp4Recorder {
    pub fn new(config: RecorderConfig, init: Init, events: Arc<dyn SegmentEvents>) -> Result<Self> {
        let leading = init
            .leading_track()
            .map(|t| t.id)
            .ok_or_else(|| Error::invalid_mp4("init has no tracks"))?;
        let tracks = init
            .tracks
            .iter()
            .map(|t| TrackState {
                id: t.id,
                timescale: t.timescale,
                pending: None,
                last_duration: 0,
                part: None,
            })
            .collect();

        Ok(Self {
            config,
            init,
            leading,
            tracks,
            segment: None,
            init_written: false,
            sequence_number: 0,
            events,
        })
    }

    /// Track layout written at the head of every segment.
    pub fn init(&self) -> &Init {
        &self.init
    }

    /// Feed one sample. `dts` is the decode time on the stream clock and
    /// `ntp` the matching wall-clock instant.
    pub fn write_sample(
        &mut self,
        track_id: u32,
        dts: TimeDelta,
        ntp: DateTime<Utc>,
        sample: RecordSample,
    ) -> Result<()> {
        let idx = self.init.position(track_id).ok_or(Error::UnknownTrack(track_id))?;
        let starts_segment = track_id == self.leading && !sample.is_non_sync;

        let rotate = match &self.segment {
            None if !starts_segment => return Ok(()),
            None => true,
            Some(seg) => starts_segment && dts - seg.start_dts() >= self.config.segment_duration,
        };

        if rotate {
            if self.segment.is_some() {
                self.finish_segment(Some(dts))?;
            }
            self.start_segment(dts, ntp);
        }

        let Some(seg) = self.segment.as_mut() else {
            return Ok(());
        };
        let segment_start = seg.start_dts();
        if dts < segment_start {
            tracing::trace!(track_id, "dropping sample older than the segment start");
            return Ok(());
        }
        seg.observe_dts(dts);
        let flush_due = dts - seg.last_flush() >= self.config.part_duration;

        let track = &mut self.tracks[idx];
        track.complete_pending(segment_start, Some(dts));
        track.pending = Some((dts, sample));

        if flush_due {
            self.flush_part(dts)?;
        }

        Ok(())
    }

    /// Flush pending samples and close the current segment.
    pub fn close(&mut self) -> Result<()> {
        if self.segment.is_some() {
            self.finish_segment(None)?;
        }
        Ok(())
    }

    fn start_segment(&mut self, dts: TimeDelta, ntp: DateTime<Utc>) {
        let mut seg = SegmentWriter::new(
            &self.config.template,
            &self.config.stream,
            RecordFormat::Fmp4,
            dts,
            ntp,
            self.events.clone(),
        );
        seg.initialize();
        tracing::debug!(stream = %self.config.stream, path = %seg.path().display(), "starting segment");

        self.segment = Some(seg);
        self.init_written = false;
        for track in &mut self.tracks {
            track.pending = None;
            track.part = None;
        }
    }

    /// Complete every pending sample at `end` (or with its predecessor's
    /// duration), write the last part and close the file.
    fn finish_segment(&mut self, end: Option<TimeDelta>) -> Result<()> {
        let Some(segment_start) = self.segment.as_ref().map(|s| s.start_dts()) else {
            return Ok(());
        };
        for track in &mut self.tracks {
            track.complete_pending(segment_start, end);
        }

        let flushed = self.write_part();
        let closed = match self.segment.take() {
            Some(seg) => seg.close().map_err(Error::from),
            None => Ok(()),
        };
        flushed.and(closed)
    }

    fn flush_part(&mut self, dts: TimeDelta) -> Result<()> {
        self.write_part()?;
        if let Some(seg) = self.segment.as_mut() {
            seg.set_last_flush(dts);
        }
        Ok(())
    }

    /// Write buffered samples as one fragment. A write failure drops the
    /// segment; the next sync sample starts a fresh one.
    fn write_part(&mut self) -> Result<()> {
        let tracks: Vec<FragmentTrack> = self.tracks.iter_mut().filter_map(|t| t.part.take()).collect();
        if tracks.is_empty() {
            return Ok(());
        }

        self.sequence_number += 1;
        let fragment = Fragment {
            sequence_number: self.sequence_number,
            tracks,
        };

        let Some(seg) = self.segment.as_mut() else {
            return Ok(());
        };
        let mut result = Ok(());
        if !self.init_written {
            result = seg.write_all(&self.init.marshal());
            self.init_written = result.is_ok();
        }
        if result.is_ok() {
            result = seg.write_all(&fragment.marshal());
        }

        if let Err(e) = result {
            tracing::error!(stream = %self.config.stream, path = %seg.path().display(), "segment write failed: {}", e);
            self.segment = None;
            for track in &mut self.tracks {
                track.pending = None;
                track.part = None;
            }
            return Err(e.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::segment::tests::RecordingEvents;
    use chrono::TimeZone;
    use std::path::Path;
    use tapedeck_media::{Fmp4Reader, InitTrack};

    fn init() -> Init {
        Init::new(vec![
            InitTrack::avc(1, 90_000, 640, 360, &[1, 0x42, 0, 0x1e]),
            InitTrack::aac(2, 48_000, 2, &[0, 0, 0, 0]),
        ])
    }

    fn recorder(dir: &Path, events: Arc<RecordingEvents>) -> Fmp4Recorder {
        let config = RecorderConfig {
            stream: "cam1".to_string(),
            template: PathTemplate::new(format!("{}/%path/%Y-%m-%d_%H-%M-%S-%f", dir.display())),
            segment_duration: TimeDelta::seconds(2),
            part_duration: TimeDelta::milliseconds(500),
        };
        Fmp4Recorder::new(config, init(), events).unwrap()
    }

    fn video(key: bool) -> RecordSample {
        RecordSample {
            payload: Bytes::from_static(b"video"),
            cts_offset: 0,
            is_non_sync: !key,
        }
    }

    fn audio() -> RecordSample {
        RecordSample {
            payload: Bytes::from_static(b"aud"),
            cts_offset: 0,
            is_non_sync: false,
        }
    }

    /// 10 fps video with a keyframe every second, plus audio every 100 ms.
    fn feed(rec: &mut Fmp4Recorder, seconds: i64) {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for frame in 0..seconds * 10 {
            let dts = TimeDelta::milliseconds(frame * 100);
            rec.write_sample(1, dts, epoch + dts, video(frame % 10 == 0)).unwrap();
            rec.write_sample(2, dts, epoch + dts, audio()).unwrap();
        }
    }

    #[test]
    fn test_rotation_on_keyframe() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(RecordingEvents::default());
        let mut rec = recorder(dir.path(), events.clone());

        feed(&mut rec, 5);
        rec.close().unwrap();

        let completed = events.completed.lock().unwrap();
        assert_eq!(completed.len(), 3);
        assert_eq!(completed[0].1, TimeDelta::milliseconds(1900));
        assert!(completed[0]
            .0
            .ends_with("cam1/2024-01-01_00-00-00-000000.mp4"));
        assert!(completed[1]
            .0
            .ends_with("cam1/2024-01-01_00-00-02-000000.mp4"));
        assert!(completed[2]
            .0
            .ends_with("cam1/2024-01-01_00-00-04-000000.mp4"));
        assert!(completed.iter().all(|c| c.2 > 0));
    }

    #[test]
    fn test_segment_content() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(RecordingEvents::default());
        let mut rec = recorder(dir.path(), events.clone());

        feed(&mut rec, 2);
        rec.close().unwrap();

        let path = events.completed.lock().unwrap()[0].0.clone();
        let mut reader = Fmp4Reader::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(reader.init(), &init());

        let mut video_dts = Vec::new();
        let mut audio_count = 0;
        let mut parts = 0;
        while let Some(part) = reader.next_part().unwrap() {
            parts += 1;
            for track in &part.tracks {
                if track.track_id == 1 {
                    video_dts.extend(track.samples.iter().map(|s| s.dts));
                } else {
                    audio_count += track.samples.len();
                }
            }
        }

        assert!(parts >= 3);
        assert_eq!(video_dts.len(), 20);
        assert_eq!(audio_count, 20);
        // Relative to the segment start, 100 ms apart at 90 kHz.
        assert_eq!(video_dts[0], 0);
        assert_eq!(video_dts[1], 9000);
        assert_eq!(video_dts[19], 19 * 9000);
    }

    #[test]
    fn test_waits_for_leading_keyframe() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(RecordingEvents::default());
        let mut rec = recorder(dir.path(), events.clone());
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        rec.write_sample(2, TimeDelta::zero(), epoch, audio()).unwrap();
        rec.write_sample(1, TimeDelta::zero(), epoch, video(false)).unwrap();
        assert!(events.created.lock().unwrap().is_empty());

        let t = TimeDelta::milliseconds(300);
        rec.write_sample(1, t, epoch + t, video(true)).unwrap();
        rec.close().unwrap();

        let completed = events.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].0.ends_with("cam1/2024-01-01_00-00-00-300000.mp4"));
    }

    #[test]
    fn test_unknown_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = recorder(dir.path(), Arc::new(RecordingEvents::default()));
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            rec.write_sample(7, TimeDelta::zero(), epoch, audio()),
            Err(Error::UnknownTrack(7))
        ));
    }
}
