//! Media samples as carried between readers, muxers and the recorder.

use bytes::Bytes;

/// One access unit of one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Duration in track timescale units.
    pub duration: u32,
    /// Composition time minus decode time.
    pub cts_offset: i32,
    /// Whether the sample depends on earlier samples.
    pub is_non_sync: bool,
    /// Encoded payload.
    pub payload: Bytes,
}

impl Sample {
    /// Payload size in bytes.
    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Timing and size without the payload.
    pub fn info(&self) -> SampleInfo {
        SampleInfo {
            duration: self.duration,
            cts_offset: self.cts_offset,
            is_non_sync: self.is_non_sync,
            size: self.size(),
        }
    }

    /// Sample flags as written in `trun`.
    pub fn flags(&self) -> u32 {
        if self.is_non_sync {
            NON_SYNC_SAMPLE_FLAGS
        } else {
            SYNC_SAMPLE_FLAGS
        }
    }
}

/// A sample whose payload is stored elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub duration: u32,
    pub cts_offset: i32,
    pub is_non_sync: bool,
    /// Payload size in bytes.
    pub size: u32,
}

/// `sample_depends_on = 2` (no other samples).
pub const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;

/// `sample_depends_on = 1` plus `sample_is_non_sync_sample`.
pub const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

/// Bit marking a non-sync sample inside sample flags.
pub const NON_SYNC_BIT: u32 = 0x0001_0000;
