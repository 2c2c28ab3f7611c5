//! Movie fragment (`moof` + `mdat`) serialization.

use crate::boxes::{begin_box, begin_full_box, end_box, put_box_header};
use crate::Sample;
use bytes::{BufMut, Bytes, BytesMut};

/// `tfhd` flag: data offsets are relative to the enclosing `moof`.
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

/// `trun` flags: data offset, then per-sample duration, size, flags and
/// composition offset.
const TRUN_FLAGS: u32 = 0x0001 | 0x0100 | 0x0200 | 0x0400 | 0x0800;

/// Samples of one track inside a fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentTrack {
    pub id: u32,
    /// Decode time of the first sample, in track timescale.
    pub base_time: u64,
    pub samples: Vec<Sample>,
}

impl FragmentTrack {
    pub fn new(id: u32, base_time: u64) -> Self {
        Self {
            id,
            base_time,
            samples: Vec::new(),
        }
    }

    /// Decode time just past the last sample.
    pub fn end_time(&self) -> u64 {
        self.base_time + self.samples.iter().map(|s| s.duration as u64).sum::<u64>()
    }

    fn payload_size(&self) -> u64 {
        self.samples.iter().map(|s| s.payload.len() as u64).sum()
    }
}

/// A movie fragment: one `moof` describing every track run, followed by a
/// single `mdat` holding the payloads track after track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub sequence_number: u32,
    pub tracks: Vec<FragmentTrack>,
}

impl Fragment {
    pub fn new(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            tracks: Vec::new(),
        }
    }

    /// Total number of samples.
    pub fn sample_count(&self) -> usize {
        self.tracks.iter().map(|t| t.samples.len()).sum()
    }

    /// Total payload bytes.
    pub fn payload_size(&self) -> u64 {
        self.tracks.iter().map(FragmentTrack::payload_size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Serialize as `moof` + `mdat`. Tracks without samples are omitted.
    pub fn marshal(&self) -> Bytes {
        let payload_size = self.payload_size();
        let tracks: Vec<&FragmentTrack> =
            self.tracks.iter().filter(|t| !t.samples.is_empty()).collect();

        let mut buf = BytesMut::with_capacity(
            256 + self.sample_count() * 16 + payload_size as usize,
        );

        let moof = begin_box(&mut buf, b"moof");

        let mfhd = begin_full_box(&mut buf, b"mfhd", 0, 0);
        buf.put_u32(self.sequence_number);
        end_box(&mut buf, mfhd);

        let mut data_offset_positions = Vec::with_capacity(tracks.len());
        for track in &tracks {
            let traf = begin_box(&mut buf, b"traf");

            let tfhd = begin_full_box(&mut buf, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF);
            buf.put_u32(track.id);
            end_box(&mut buf, tfhd);

            let tfdt = begin_full_box(&mut buf, b"tfdt", 1, 0);
            buf.put_u64(track.base_time);
            end_box(&mut buf, tfdt);

            // Version 1 for signed composition offsets
            let trun = begin_full_box(&mut buf, b"trun", 1, TRUN_FLAGS);
            buf.put_u32(track.samples.len() as u32);
            data_offset_positions.push(buf.len());
            buf.put_i32(0); // placeholder
            for sample in &track.samples {
                buf.put_u32(sample.duration);
                buf.put_u32(sample.size());
                buf.put_u32(sample.flags());
                buf.put_i32(sample.cts_offset);
            }
            end_box(&mut buf, trun);

            end_box(&mut buf, traf);
        }

        end_box(&mut buf, moof);

        let moof_size = (buf.len() - moof) as u64;
        let mdat_header = if payload_size + 8 > u32::MAX as u64 { 16 } else { 8 };
        let mut data_offset = moof_size + mdat_header;
        for (track, pos) in tracks.iter().zip(data_offset_positions) {
            buf[pos..pos + 4].copy_from_slice(&(data_offset as i32).to_be_bytes());
            data_offset += track.payload_size();
        }

        put_box_header(&mut buf, b"mdat", payload_size);
        for track in &tracks {
            for sample in &track.samples {
                buf.put_slice(&sample.payload);
            }
        }

        buf.freeze()
    }
}
