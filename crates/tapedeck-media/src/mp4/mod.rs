//! MP4 container parsing and progressive writing.
//!
//! [`Mp4File`] describes the movie header and every track of a file, either
//! progressive (with sample tables) or fragmented (with `trex` defaults and a
//! count of `moof` boxes). [`Mp4Writer`] produces progressive files.

mod atoms;
mod reader;
mod sample_table;
mod writer;

pub use atoms::{Atom, AtomType, HandlerType, TrackDefaults, TrackInfo};
pub use reader::{parse_moov, Mp4Reader};
pub use sample_table::{SampleEntry, SampleTable, SampleTableBuilder};
pub use writer::Mp4Writer;

use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Parsed MP4 file.
#[derive(Debug, Default)]
pub struct Mp4File {
    /// Duration in movie timescale units.
    pub duration: u64,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// Tracks in `moov` order.
    pub tracks: Vec<TrackInfo>,
    /// Fragment defaults; present only in fragmented files.
    pub trex: Vec<TrackDefaults>,
    /// Whether moov comes before mdat.
    pub has_faststart: bool,
    /// Number of complete `moof` boxes.
    pub fragment_count: usize,
}

impl Mp4File {
    /// Parse an MP4 file from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse an MP4 file from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        Mp4Reader::new(reader)?.parse()
    }

    /// Whether the file carries `mvex`, i.e. samples live in fragments.
    pub fn is_fragmented(&self) -> bool {
        !self.trex.is_empty()
    }

    /// Track by ID.
    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    /// First video track.
    pub fn video_track(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.handler_type.is_video())
    }

    /// Get the duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }
}
