//! Playback errors and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::io;
use tapedeck_common::RecordFormat;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlaybackError>;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("invalid start: {0}")]
    InvalidStart(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("{0}")]
    InvalidFormat(String),

    #[error("path '{0}' is not configured or has playback disabled")]
    PathNotFound(String),

    #[error("no recordings found")]
    NoSegments,

    #[error("{0} recordings cannot be served")]
    UnsupportedRecordFormat(RecordFormat),

    #[error("inventory request failed: {0}")]
    Inventory(String),

    #[error("invalid recording descriptor: {0}")]
    InvalidDescriptor(String),

    #[error(transparent)]
    Media(#[from] tapedeck_media::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("playback task failed: {0}")]
    Task(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
}

impl PlaybackError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidStart(_)
            | Self::InvalidDuration(_)
            | Self::InvalidFormat(_)
            | Self::UnsupportedRecordFormat(_) => StatusCode::BAD_REQUEST,
            Self::PathNotFound(_) | Self::NoSegments => StatusCode::NOT_FOUND,
            Self::Inventory(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidDescriptor(_) | Self::Media(_) | Self::Io(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStart(_) => "invalid_start",
            Self::InvalidDuration(_) => "invalid_duration",
            Self::InvalidFormat(_) => "invalid_format",
            Self::PathNotFound(_) => "path_not_found",
            Self::NoSegments => "no_segments",
            Self::UnsupportedRecordFormat(_) => "unsupported_record_format",
            Self::Inventory(_) => "inventory_error",
            Self::InvalidDescriptor(_) => "invalid_descriptor",
            Self::Media(_) => "media_error",
            Self::Io(_) => "io_error",
            Self::Task(_) => "internal_error",
        }
    }

    /// Whether the error means the client went away mid-stream.
    pub fn is_client_abort(&self) -> bool {
        let io_err = match self {
            Self::Io(e) => e,
            Self::Media(tapedeck_media::Error::Io(e)) => e,
            _ => return false,
        };
        matches!(
            io_err.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        )
    }
}

impl IntoResponse for PlaybackError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (self.status(), Json(body)).into_response()
    }
}
