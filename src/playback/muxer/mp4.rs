use super::track::{Timed, TrackBuffer};
use super::{read_range, Muxer};
use crate::playback::Result;
use bytes::Bytes;
use chrono::TimeDelta;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use tapedeck_media::{Error, Fmp4Reader, Init, Mp4Writer, Sample, SampleInfo};

/// A sample whose payload sits in the spool file.
#[derive(Debug, Clone, Copy)]
struct SpooledSample {
    info: SampleInfo,
    offset: u64,
}

impl Timed for SpooledSample {
    fn is_non_sync(&self) -> bool {
        self.info.is_non_sync
    }

    fn set_duration(&mut self, duration: u32) {
        self.info.duration = duration;
    }

    fn buffered_size(&self) -> usize {
        0
    }
}

/// Rewraps the requested range as a progressive MP4, written at `flush`.
///
/// The index has to precede the media data, so nothing can be sent before the
/// last sample is known. Payloads are spooled to an anonymous temporary file
/// meanwhile and only sample metadata stays in memory.
pub struct Mp4Muxer<W> {
    writer: W,
    init: Option<Init>,
    tracks: Vec<TrackBuffer<SpooledSample>>,
    spool: Option<BufWriter<File>>,
    spool_len: u64,
}

impl<W: Write> Mp4Muxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            init: None,
            tracks: Vec::new(),
            spool: None,
            spool_len: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn push(&mut self, track_id: u32, dts: i64, sample: Sample) -> Result<()> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(Error::UnknownTrack(track_id))?;

        let spool = match self.spool.take() {
            Some(spool) => spool,
            None => BufWriter::new(tempfile::tempfile()?),
        };
        let spool = self.spool.insert(spool);
        spool.write_all(&sample.payload)?;

        track.push(
            dts,
            SpooledSample {
                info: sample.info(),
                offset: self.spool_len,
            },
        );
        self.spool_len += sample.payload.len() as u64;
        Ok(())
    }
}

impl<W: Write> Muxer for Mp4Muxer<W> {
    fn write_init(&mut self, init: &Init) -> Result<()> {
        self.tracks = init
            .tracks
            .iter()
            .map(|t| TrackBuffer::new(t.id, t.timescale))
            .collect();
        self.init = Some(init.clone());
        self.spool = None;
        self.spool_len = 0;
        Ok(())
    }

    fn mux_range<R: Read + Seek>(
        &mut self,
        reader: &mut Fmp4Reader<R>,
        position: TimeDelta,
        max_duration: TimeDelta,
    ) -> Result<Option<TimeDelta>> {
        read_range(reader, position, max_duration, |id, dts, sample| {
            self.push(id, dts, sample)
        })
    }

    fn flush(&mut self) -> Result<()> {
        let Some(init) = self.init.take() else {
            return Ok(());
        };

        let mut mp4 = Mp4Writer::new(init);
        let mut locations: Vec<Vec<(u64, u32)>> = Vec::with_capacity(self.tracks.len());
        for track in &mut self.tracks {
            let mut spooled = Vec::new();
            for s in track.take() {
                mp4.push(track.id, s.dts, s.sample.info)?;
                spooled.push((s.sample.offset, s.sample.info.size));
            }
            locations.push(spooled);
        }
        if mp4.is_empty() {
            return Ok(());
        }
        let Some(spool) = self.spool.take() else {
            return Ok(());
        };

        let mut spool = spool.into_inner().map_err(|e| e.into_error())?;
        let written = mp4.write_to(&mut self.writer, |t, s| {
            let (offset, size) = locations[t][s];
            spool.seek(SeekFrom::Start(offset))?;
            let mut payload = vec![0; size as usize];
            spool.read_exact(&mut payload)?;
            Ok(Bytes::from(payload))
        })?;
        self.writer.flush()?;
        tracing::debug!(
            bytes = written,
            samples = mp4.sample_count(),
            spooled = self.spool_len,
            "wrote progressive mp4"
        );
        Ok(())
    }
}
