//! Progressive MP4 writer.
//!
//! Collects sample timing and sizes, then writes `ftyp`, a fully indexed
//! `moov` and a single `mdat`. Payloads are pulled from the caller one at a
//! time while `mdat` is written, so they never have to be held together.
//! Samples are interleaved by decode time with one chunk per sample, so chunk
//! offsets are always written as `co64`.

use crate::boxes::{begin_box, begin_full_box, end_box, put_box_header};
use crate::fmp4::{put_ftyp, put_mvhd, write_trak, Init, MOVIE_TIMESCALE};
use crate::{Error, Result, SampleInfo};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Write;

#[derive(Debug, Default)]
struct WriterTrack {
    first_dts: Option<u64>,
    samples: Vec<SampleInfo>,
}

impl WriterTrack {
    fn media_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }
}

/// Accumulates the sample index of a progressive MP4 file.
#[derive(Debug)]
pub struct Mp4Writer {
    init: Init,
    tracks: Vec<WriterTrack>,
}

impl Mp4Writer {
    pub fn new(init: Init) -> Self {
        let tracks = init.tracks.iter().map(|_| WriterTrack::default()).collect();
        Self { init, tracks }
    }

    pub fn init(&self) -> &Init {
        &self.init
    }

    /// Append a sample. `dts` only matters for the first sample of a track;
    /// later samples follow from the durations.
    pub fn push(&mut self, track_id: u32, dts: u64, sample: SampleInfo) -> Result<()> {
        let idx = self.init.position(track_id).ok_or(Error::UnknownTrack(track_id))?;
        let track = &mut self.tracks[idx];
        track.first_dts.get_or_insert(dts);
        track.samples.push(sample);
        Ok(())
    }

    pub fn sample_count(&self) -> usize {
        self.tracks.iter().map(|t| t.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Write the complete file and return the number of bytes written.
    ///
    /// `payload(track, index)` returns the payload of the `index`-th sample
    /// pushed to the track at position `track` of the init. It is called in
    /// `mdat` order.
    pub fn write_to<W, F>(&self, w: &mut W, mut payload: F) -> Result<u64>
    where
        W: Write,
        F: FnMut(usize, usize) -> Result<Bytes>,
    {
        let order = self.interleave();
        let payload_size: u64 = order
            .iter()
            .map(|&(t, s)| self.tracks[t].samples[s].size as u64)
            .sum();

        let mut head = BytesMut::with_capacity(1024);
        put_ftyp(&mut head, b"isom", &[b"isom", b"iso2", b"avc1", b"mp41"]);
        let ftyp_size = head.len() as u64;

        // Offsets depend on the moov size, which does not depend on the offsets.
        let placeholder: Vec<Vec<u64>> = self.tracks.iter().map(|t| vec![0; t.samples.len()]).collect();
        let moov_size = self.moov(&placeholder).len() as u64;
        let mdat_header = if payload_size + 8 > u32::MAX as u64 { 16 } else { 8 };

        let mut offsets = placeholder;
        let mut pos = ftyp_size + moov_size + mdat_header;
        for &(t, s) in &order {
            offsets[t][s] = pos;
            pos += self.tracks[t].samples[s].size as u64;
        }

        head.extend_from_slice(&self.moov(&offsets));
        put_box_header(&mut head, b"mdat", payload_size);
        w.write_all(&head)?;

        for &(t, s) in &order {
            let data = payload(t, s)?;
            let expected = self.tracks[t].samples[s].size;
            if data.len() as u64 != expected as u64 {
                return Err(Error::invalid_mp4(format!(
                    "payload of {} bytes for a sample of {} bytes",
                    data.len(),
                    expected
                )));
            }
            w.write_all(&data)?;
        }

        Ok(head.len() as u64 + payload_size)
    }

    /// Sample order in `mdat`: by decode time across tracks, track order on ties.
    fn interleave(&self) -> Vec<(usize, usize)> {
        let mut order = Vec::with_capacity(self.sample_count());
        for (t, track) in self.tracks.iter().enumerate() {
            let timescale = self.init.tracks[t].timescale.max(1) as i128;
            let mut dts = track.first_dts.unwrap_or(0) as i128;
            for (s, sample) in track.samples.iter().enumerate() {
                order.push((dts * 1_000_000_000 / timescale, t, s));
                dts += sample.duration as i128;
            }
        }
        order.sort_by_key(|&(time, t, _)| (time, t));
        order.into_iter().map(|(_, t, s)| (t, s)).collect()
    }

    fn moov(&self, offsets: &[Vec<u64>]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(1024 + self.sample_count() * 24);

        let movie_duration = self
            .init
            .tracks
            .iter()
            .zip(&self.tracks)
            .map(|(cfg, track)| {
                let ts = cfg.timescale.max(1) as u64;
                (track.first_dts.unwrap_or(0) + track.media_duration()) * MOVIE_TIMESCALE as u64 / ts
            })
            .max()
            .unwrap_or(0);

        let moov = begin_box(&mut buf, b"moov");
        put_mvhd(&mut buf, movie_duration, self.init.next_track_id());

        for ((cfg, track), offsets) in self.init.tracks.iter().zip(&self.tracks).zip(offsets) {
            let delay = track.first_dts.unwrap_or(0) * MOVIE_TIMESCALE as u64 / cfg.timescale.max(1) as u64;
            write_trak(&mut buf, cfg, track.media_duration(), delay, |buf| {
                write_tables(buf, &track.samples, offsets)
            });
        }

        end_box(&mut buf, moov);
        buf
    }
}

fn write_tables(buf: &mut BytesMut, samples: &[SampleInfo], offsets: &[u64]) {
    let stts = begin_full_box(buf, b"stts", 0, 0);
    let runs = run_lengths(samples.iter().map(|s| s.duration));
    buf.put_u32(runs.len() as u32);
    for (count, duration) in runs {
        buf.put_u32(count);
        buf.put_u32(duration);
    }
    end_box(buf, stts);

    if samples.iter().any(|s| s.cts_offset != 0) {
        let version = if samples.iter().any(|s| s.cts_offset < 0) { 1 } else { 0 };
        let ctts = begin_full_box(buf, b"ctts", version, 0);
        let runs = run_lengths(samples.iter().map(|s| s.cts_offset));
        buf.put_u32(runs.len() as u32);
        for (count, offset) in runs {
            buf.put_u32(count);
            buf.put_i32(offset);
        }
        end_box(buf, ctts);
    }

    if samples.iter().any(|s| s.is_non_sync) {
        let stss = begin_full_box(buf, b"stss", 0, 0);
        let sync: Vec<u32> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_non_sync)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        buf.put_u32(sync.len() as u32);
        for number in sync {
            buf.put_u32(number);
        }
        end_box(buf, stss);
    }

    let stsc = begin_full_box(buf, b"stsc", 0, 0);
    if samples.is_empty() {
        buf.put_u32(0);
    } else {
        buf.put_u32(1);
        buf.put_u32(1); // first chunk
        buf.put_u32(1); // samples per chunk
        buf.put_u32(1); // sample description index
    }
    end_box(buf, stsc);

    let stsz = begin_full_box(buf, b"stsz", 0, 0);
    buf.put_u32(0); // sizes follow
    buf.put_u32(samples.len() as u32);
    for sample in samples {
        buf.put_u32(sample.size);
    }
    end_box(buf, stsz);

    let co64 = begin_full_box(buf, b"co64", 0, 0);
    buf.put_u32(offsets.len() as u32);
    for &offset in offsets {
        buf.put_u64(offset);
    }
    end_box(buf, co64);
}

fn run_lengths<T: PartialEq + Copy>(values: impl Iterator<Item = T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}
