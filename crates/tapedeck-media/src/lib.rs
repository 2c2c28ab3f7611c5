//! Tapedeck-Media: ISO-BMFF primitives for recording and playback.
//!
//! This crate reads and writes the containers tapedeck deals with. It knows
//! nothing about files on disk beyond `Read + Seek` and `Write`.
//!
//! # Modules
//!
//! - `mp4` - box walking, `moov` parsing, sample tables, progressive MP4 writer
//! - `fmp4` - fragmented MP4 init segments, fragments and a fragment reader
//! - `sample` - the sample type shared by readers and writers
//!
//! # Segment layout
//!
//! A recorded segment is `ftyp` + `moov` (with `mvex`) followed by parts, each
//! a `moof` + `mdat` pair. Decode times in `tfdt` are relative to the segment
//! start, so a segment can be muxed on its own without knowing its neighbours.

mod boxes;
pub mod error;
pub mod fmp4;
pub mod mp4;
pub mod sample;

pub use error::{Error, Result};
pub use fmp4::{Fmp4Reader, Fragment, FragmentTrack, Init, InitTrack};
pub use mp4::{HandlerType, Mp4File, Mp4Writer};
pub use sample::{Sample, SampleInfo};
