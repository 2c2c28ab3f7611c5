//! Error types for tapedeck-media.

use std::io;
use thiserror::Error;

/// Result type for tapedeck-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tapedeck-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid MP4 file structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required atom in MP4 file.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Box payload shorter than its fields.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },

    /// A fragment or sample references a track absent from the init.
    #[error("Unknown track: {0}")]
    UnknownTrack(u32),
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether the error comes from the underlying reader or writer.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
