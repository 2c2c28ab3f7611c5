//! Fragmented MP4 (fMP4).
//!
//! A recorded segment is an initialization segment (`ftyp` + `moov` with an
//! `mvex`) followed by any number of `moof` + `mdat` parts:
//!
//! - [`Init`] models the track layout and serializes the init segment
//! - [`Fragment`] serializes one part
//! - [`Fmp4Reader`] walks the parts of an existing segment file

mod init;
mod moof;
mod reader;

pub use init::{Init, InitTrack};
pub use moof::{Fragment, FragmentTrack};
pub use reader::{Fmp4Reader, Part, PartSample, PartTrack};

pub(crate) use init::{put_ftyp, put_mvhd, write_trak, MOVIE_TIMESCALE};
