//! Playback of recorded segments.
//!
//! A request names a stream, a start instant and a duration. The engine seeks
//! into the first segment covering the start and keeps appending following
//! segments while they are contiguous and share the same track layout:
//!
//! ```text
//! window:        |<---------------- duration ---------------->|
//! segments:  [ seg 0 ......... ][ seg 1 .......... ]  gap  [ seg 2 ... ]
//! output:        [ from seg 0 ][ from seg 1 ...... ]
//! ```
//!
//! Muxing is synchronous and writes into a [`ResponseWriter`] that feeds the
//! HTTP body, so handlers run it on a blocking thread.

mod engine;
mod error;
pub mod muxer;
mod output;
mod segment;

pub use engine::{can_concatenate, is_contiguous, seek_and_mux, DEFAULT_TOLERANCE};
pub use error::{PlaybackError, Result};
pub use muxer::{Fmp4Muxer, Mp4Muxer, Muxer, OutputMuxer};
pub use output::{BodyChunk, ErrorDisposition, ResponseParts, ResponseWriter};
pub use segment::{PlaybackWindow, Segment};
