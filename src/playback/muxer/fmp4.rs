use super::track::TrackBuffer;
use super::{read_range, Muxer};
use crate::playback::Result;
use chrono::TimeDelta;
use std::io::{Read, Seek, Write};
use tapedeck_media::{Error, Fmp4Reader, Fragment, FragmentTrack, Init};

/// Buffered payload that triggers a fragment.
const FLUSH_THRESHOLD: usize = 1024 * 1024;

/// Streams fragmented MP4: the init, then one fragment per ~1 MiB of samples.
pub struct Fmp4Muxer<W> {
    writer: W,
    init: Option<Init>,
    init_written: bool,
    tracks: Vec<TrackBuffer>,
    sequence_number: u32,
}

impl<W: Write> Fmp4Muxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            init: None,
            init_written: false,
            tracks: Vec::new(),
            sequence_number: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn push(&mut self, track_id: u32, dts: i64, sample: tapedeck_media::Sample) -> Result<()> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or(Error::UnknownTrack(track_id))?;
        track.push(dts, sample);

        // A track still in preroll (audio ending before the window start, say)
        // is emitted as it stands once another track has reached the window.
        let buffered: usize = self.tracks.iter().map(TrackBuffer::payload_size).sum();
        if buffered >= FLUSH_THRESHOLD && self.tracks.iter().any(TrackBuffer::reached_window) {
            self.write_fragment()?;
        }
        Ok(())
    }

    fn write_fragment(&mut self) -> Result<()> {
        let mut tracks = Vec::new();
        for buf in self.tracks.iter_mut().filter(|t| !t.is_empty()) {
            let samples = buf.take();
            let mut track = FragmentTrack::new(buf.id, samples[0].dts);
            track.samples = samples.into_iter().map(|s| s.sample).collect();
            tracks.push(track);
        }
        if tracks.is_empty() {
            return Ok(());
        }

        if !self.init_written {
            let Some(init) = &self.init else {
                return Err(Error::invalid_mp4("fragment before init").into());
            };
            self.writer.write_all(&init.marshal())?;
            self.init_written = true;
        }

        self.sequence_number += 1;
        let fragment = Fragment {
            sequence_number: self.sequence_number,
            tracks,
        };
        self.writer.write_all(&fragment.marshal())?;
        Ok(())
    }
}

impl<W: Write> Muxer for Fmp4Muxer<W> {
    fn write_init(&mut self, init: &Init) -> Result<()> {
        self.tracks = init
            .tracks
            .iter()
            .map(|t| TrackBuffer::new(t.id, t.timescale))
            .collect();
        self.init = Some(init.clone());
        self.init_written = false;
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
        self.write_fragment()?;
        self.writer.flush()?;
        Ok(())
    }
}
