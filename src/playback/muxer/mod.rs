//! Output muxers for playback responses.
//!
//! - [`Fmp4Muxer`] re-times recorded samples into new fragments and streams them
//! - [`Mp4Muxer`] collects everything and writes a progressive MP4 at the end
//!
//! Both place samples on a timeline that starts at the requested window start.

mod fmp4;
mod mp4;
mod track;

pub use fmp4::Fmp4Muxer;
pub use mp4::Mp4Muxer;

use super::Result;
use chrono::TimeDelta;
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use tapedeck_common::time::{from_timescale, to_timescale};
use tapedeck_common::OutputFormat;
use tapedeck_media::{Error, Fmp4Reader, Init, Sample};

/// Sink for the samples of one or more segments.
pub trait Muxer {
    /// Declare the track layout of the output.
    fn write_init(&mut self, init: &Init) -> Result<()>;

    /// Mux the samples of `reader` whose output time falls below
    /// `max_duration`. The segment begins `position` after the window start
    /// (negative when the window starts inside it).
    ///
    /// Returns the time reached relative to the window start, or `None` when
    /// no sample of the segment reaches into the window. In that case nothing
    /// has been written.
    fn mux_range<R: Read + Seek>(
        &mut self,
        reader: &mut Fmp4Reader<R>,
        position: TimeDelta,
        max_duration: TimeDelta,
    ) -> Result<Option<TimeDelta>>;

    /// Write whatever is still buffered.
    fn flush(&mut self) -> Result<()>;
}

/// Muxer chosen for a request.
pub enum OutputMuxer<W: Write> {
    Fmp4(Fmp4Muxer<W>),
    Mp4(Mp4Muxer<W>),
}

impl<W: Write> OutputMuxer<W> {
    pub fn new(format: OutputFormat, writer: W) -> Self {
        match format {
            OutputFormat::Fmp4 => Self::Fmp4(Fmp4Muxer::new(writer)),
            OutputFormat::Mp4 => Self::Mp4(Mp4Muxer::new(writer)),
        }
    }

    pub fn into_inner(self) -> W {
        match self {
            Self::Fmp4(m) => m.into_inner(),
            Self::Mp4(m) => m.into_inner(),
        }
    }
}

impl<W: Write> Muxer for OutputMuxer<W> {
    fn write_init(&mut self, init: &Init) -> Result<()> {
        match self {
            Self::Fmp4(m) => m.write_init(init),
            Self::Mp4(m) => m.write_init(init),
        }
    }

    fn mux_range<R: Read + Seek>(
        &mut self,
        reader: &mut Fmp4Reader<R>,
        position: TimeDelta,
        max_duration: TimeDelta,
    ) -> Result<Option<TimeDelta>> {
        match self {
            Self::Fmp4(m) => m.mux_range(reader, position, max_duration),
            Self::Mp4(m) => m.mux_range(reader, position, max_duration),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Self::Fmp4(m) => m.flush(),
            Self::Mp4(m) => m.flush(),
        }
    }
}

/// Walk the parts of a segment and hand every sample inside the window to
/// `sink` as `(track_id, output dts in track timescale, sample)`.
///
/// Samples that precede the last sync sample at or before the window start
/// are skipped without reading their payload. The walk stops at the first
/// part lying entirely past `max_duration`.
pub(crate) fn read_range<R, F>(
    reader: &mut Fmp4Reader<R>,
    position: TimeDelta,
    max_duration: TimeDelta,
    mut sink: F,
) -> Result<Option<TimeDelta>>
where
    R: Read + Seek,
    F: FnMut(u32, i64, Sample) -> Result<()>,
{
    let timescales: HashMap<u32, u32> = reader
        .init()
        .tracks
        .iter()
        .map(|t| (t.id, t.timescale))
        .collect();
    let offset = |track_id: u32| -> tapedeck_media::Result<(u32, i64)> {
        let ts = timescales
            .get(&track_id)
            .copied()
            .ok_or(Error::UnknownTrack(track_id))?;
        Ok((ts, to_timescale(position, ts)))
    };

    let mut parts = Vec::new();
    while let Some(part) = reader.next_part()? {
        parts.push(part);
    }

    let mut seek_points: HashMap<u32, i64> = HashMap::new();
    for part in &parts {
        for track in &part.tracks {
            let (_, base) = offset(track.track_id)?;
            for s in track.samples.iter().filter(|s| !s.is_non_sync) {
                let dts = base + s.dts as i64;
                if dts <= 0 {
                    seek_points.insert(track.track_id, dts);
                }
            }
        }
    }

    let mut elapsed: Option<TimeDelta> = None;
    for part in &parts {
        let mut in_window = false;
        for track in &part.tracks {
            let (ts, base) = offset(track.track_id)?;
            let seek = seek_points.get(&track.track_id).copied();

            for s in &track.samples {
                let dts = base + s.dts as i64;
                if from_timescale(dts, ts) >= max_duration {
                    continue;
                }
                in_window = true;
                if seek.is_some_and(|p| dts < p) {
                    continue;
                }

                let end = from_timescale(dts + s.duration as i64, ts);
                if dts >= 0 || end > TimeDelta::zero() {
                    elapsed = Some(elapsed.map_or(end, |e| e.max(end)));
                }
                sink(track.track_id, dts, reader.read_sample(s)?)?;
            }
        }
        if !in_window {
            break;
        }
    }

    Ok(elapsed)
}
