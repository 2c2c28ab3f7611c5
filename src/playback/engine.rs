//! Seeks into the first segment of a window and concatenates the following ones.

use super::muxer::Muxer;
use super::{PlaybackError, PlaybackWindow, Result, Segment};
use chrono::{DateTime, TimeDelta, Utc};
use tapedeck_common::RecordFormat;
use tapedeck_media::Init;

/// Default gap allowed between the end of one segment and the start of the next.
pub const DEFAULT_TOLERANCE: TimeDelta = TimeDelta::seconds(1);

/// Whether a segment starting at `start` continues output that reached `segment_end`.
pub fn is_contiguous(segment_end: DateTime<Utc>, start: DateTime<Utc>, tolerance: TimeDelta) -> bool {
    (start - segment_end).abs() <= tolerance
}

/// Whether a segment can be appended to the output: same track layout and no
/// gap beyond `tolerance`.
pub fn can_concatenate(
    first_init: &Init,
    segment_end: DateTime<Utc>,
    init: &Init,
    start: DateTime<Utc>,
    tolerance: TimeDelta,
) -> bool {
    first_init == init && is_contiguous(segment_end, start, tolerance)
}

/// Mux `window` out of `segments` (sorted by start) into `muxer`.
///
/// The first segment holding a sample inside the window fixes the track
/// layout. Leading segments that end before the window start are skipped.
/// Stops without error at the first gap or layout change. Nothing reaches the
/// muxer's writer when that first segment cannot be read or no segment holds
/// a sample inside the window.
pub fn seek_and_mux<M: Muxer>(
    record_format: RecordFormat,
    segments: &[Segment],
    window: PlaybackWindow,
    muxer: &mut M,
    tolerance: TimeDelta,
) -> Result<()> {
    if record_format != RecordFormat::Fmp4 {
        return Err(PlaybackError::UnsupportedRecordFormat(record_format));
    }

    let mut rest = segments.iter();
    let (first_init, mut segment_end) = loop {
        let Some(first) = rest.next() else {
            return Err(PlaybackError::NoSegments);
        };
        if first.start >= window.end() {
            return Err(PlaybackError::NoSegments);
        }

        let mut reader = first.open()?;
        let init = reader.init().clone();
        tracing::debug!(
            path = %first.path.display(),
            tracks = init.tracks.len(),
            "opened first segment"
        );

        // Resets the muxer, which has written nothing so far.
        muxer.write_init(&init)?;

        match muxer.mux_range(&mut reader, first.start - window.start, window.duration)? {
            Some(elapsed) => break (init, window.start + elapsed),
            None => {
                tracing::debug!(path = %first.path.display(), "segment ends before the window");
            }
        }
    };

    for seg in rest {
        if segment_end >= window.end() {
            break;
        }
        if !is_contiguous(segment_end, seg.start, tolerance) {
            tracing::debug!(
                path = %seg.path.display(),
                gap_ms = (seg.start - segment_end).num_milliseconds(),
                "stopping at gap"
            );
            break;
        }

        let mut reader = seg.open()?;
        if reader.init() != &first_init {
            tracing::debug!(path = %seg.path.display(), "stopping at track layout change");
            break;
        }

        if let Some(elapsed) =
            muxer.mux_range(&mut reader, seg.start - window.start, window.duration)?
        {
            segment_end = window.start + elapsed;
        }
    }

    muxer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tapedeck_media::InitTrack;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn init(width: u16) -> Init {
        Init::new(vec![InitTrack::avc(1, 90_000, width, 360, &[1, 2, 3])])
    }

    #[test]
    fn test_contiguity_is_symmetric() {
        let tol = DEFAULT_TOLERANCE;
        assert!(is_contiguous(t(10_000), t(10_000), tol));
        assert!(is_contiguous(t(10_000), t(11_000), tol));
        assert!(is_contiguous(t(10_000), t(9_000), tol));
        assert!(!is_contiguous(t(10_000), t(11_001), tol));
        assert!(!is_contiguous(t(10_000), t(8_999), tol));
    }

    #[test]
    fn test_can_concatenate_requires_equal_layout() {
        let tol = DEFAULT_TOLERANCE;
        assert!(can_concatenate(&init(640), t(0), &init(640), t(500), tol));
        assert!(!can_concatenate(&init(640), t(0), &init(1280), t(500), tol));
        assert!(!can_concatenate(&init(640), t(0), &init(640), t(5_000), tol));
    }

    struct NullMuxer;

    impl Muxer for NullMuxer {
        fn write_init(&mut self, _: &Init) -> Result<()> {
            panic!("must not be reached");
        }

        fn mux_range<R: std::io::Read + std::io::Seek>(
            &mut self,
            _: &mut tapedeck_media::Fmp4Reader<R>,
            _: TimeDelta,
            _: TimeDelta,
        ) -> Result<Option<TimeDelta>> {
            panic!("must not be reached");
        }

        fn flush(&mut self) -> Result<()> {
            panic!("must not be reached");
        }
    }

    #[test]
    fn test_rejects_mpegts() {
        let window = PlaybackWindow::new(t(0), TimeDelta::seconds(10));
        let segments = [Segment::new("/rec/a.ts", t(0))];
        let err = seek_and_mux(RecordFormat::MpegTs, &segments, window, &mut NullMuxer, DEFAULT_TOLERANCE)
            .unwrap_err();
        assert!(matches!(err, PlaybackError::UnsupportedRecordFormat(RecordFormat::MpegTs)));
    }

    #[test]
    fn test_first_segment_open_failure() {
        let window = PlaybackWindow::new(t(0), TimeDelta::seconds(10));
        let segments = [Segment::new("/nonexistent/a.mp4", t(0))];
        let err = seek_and_mux(RecordFormat::Fmp4, &segments, window, &mut NullMuxer, DEFAULT_TOLERANCE)
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Media(ref e) if e.is_io()));
    }

    #[test]
    fn test_empty_segment_list() {
        let window = PlaybackWindow::new(t(0), TimeDelta::seconds(10));
        assert!(matches!(
            seek_and_mux(RecordFormat::Fmp4, &[], window, &mut NullMuxer, DEFAULT_TOLERANCE),
            Err(PlaybackError::NoSegments)
        ));
    }
}
