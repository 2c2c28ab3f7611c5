//! Recording side: cuts a sample stream into segment files.
//!
//! [`Fmp4Recorder`] owns the open [`SegmentWriter`] and decides when to
//! rotate; the writer only knows how to create, fill and close one file.
//! Lifecycle notifications leave through [`SegmentEvents`].

mod events;
mod fmp4;
pub(crate) mod segment;
mod split;

pub use events::{LogEvents, SegmentEvents};
pub use fmp4::{Fmp4Recorder, RecordSample, RecorderConfig};
pub use segment::SegmentWriter;
pub use split::{file_duration, split_file};
