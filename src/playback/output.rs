//! Bridge between the blocking muxer and the streamed HTTP body.

use super::PlaybackError;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use std::io::{self, Write};
use tokio::sync::{mpsc, oneshot};

pub type BodyChunk = Result<Bytes, io::Error>;

/// Receiving half of a [`ResponseWriter`].
pub struct ResponseParts {
    /// Resolves with the response headers on the first write, or fails when
    /// the writer is dropped without writing.
    pub headers: oneshot::Receiver<HeaderMap>,
    pub body: mpsc::Receiver<BodyChunk>,
}

/// `Write` implementation feeding a streamed response.
///
/// The first non-empty write releases the response headers, then every write
/// becomes one body chunk. Writes block while the channel is full, so this
/// must run on a blocking thread.
pub struct ResponseWriter {
    tx: mpsc::Sender<BodyChunk>,
    headers: Option<oneshot::Sender<HeaderMap>>,
    written: bool,
}

impl ResponseWriter {
    pub fn channel(capacity: usize) -> (Self, ResponseParts) {
        let (tx, body) = mpsc::channel(capacity);
        let (headers_tx, headers) = oneshot::channel();
        let writer = Self {
            tx,
            headers: Some(headers_tx),
            written: false,
        };
        (writer, ResponseParts { headers, body })
    }

    /// Whether any byte has been handed to the response.
    pub fn has_written(&self) -> bool {
        self.written
    }

    /// End the body with an error so the connection is closed instead of
    /// finishing normally.
    pub fn abort(self, reason: &str) {
        let err = io::Error::new(io::ErrorKind::Other, reason.to_string());
        let _ = self.tx.blocking_send(Err(err));
    }

    fn framing_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        headers
    }
}

impl Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.written {
            self.written = true;
            if let Some(tx) = self.headers.take() {
                tx.send(Self::framing_headers())
                    .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            }
        }

        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What to do with a failed playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The client disconnected; nothing to report.
    ClientGone,
    /// Nothing was sent yet; answer with this status and a JSON error.
    Respond(StatusCode),
    /// Bytes are already out; log and close the connection.
    Abort,
}

impl ErrorDisposition {
    pub fn classify(err: &PlaybackError, written: bool) -> Self {
        if err.is_client_abort() {
            Self::ClientGone
        } else if !written {
            Self::Respond(err.status())
        } else {
            Self::Abort
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_sent_once_on_first_write() {
        let (mut writer, mut parts) = ResponseWriter::channel(8);
        assert!(!writer.has_written());

        writer.write_all(b"").unwrap();
        assert!(!writer.has_written());
        assert!(parts.headers.try_recv().is_err());

        writer.write_all(b"ftyp").unwrap();
        writer.write_all(b"moov").unwrap();
        assert!(writer.has_written());

        let headers = parts.headers.try_recv().unwrap();
        assert_eq!(headers[header::ACCEPT_RANGES], "none");
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");

        drop(writer);
        let mut chunks = Vec::new();
        while let Some(chunk) = parts.body.blocking_recv() {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec![Bytes::from_static(b"ftyp"), Bytes::from_static(b"moov")]);
    }

    #[test]
    fn test_closed_body_is_broken_pipe() {
        let (mut writer, parts) = ResponseWriter::channel(8);
        drop(parts);
        let err = writer.write_all(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_abort_ends_body_with_error() {
        let (mut writer, mut parts) = ResponseWriter::channel(8);
        writer.write_all(b"data").unwrap();
        writer.abort("segment vanished");

        assert!(parts.body.blocking_recv().unwrap().is_ok());
        assert!(parts.body.blocking_recv().unwrap().is_err());
        assert!(parts.body.blocking_recv().is_none());
    }

    #[test]
    fn test_classify() {
        let broken = PlaybackError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(ErrorDisposition::classify(&broken, true), ErrorDisposition::ClientGone);
        assert_eq!(ErrorDisposition::classify(&broken, false), ErrorDisposition::ClientGone);

        let missing = PlaybackError::NoSegments;
        assert_eq!(
            ErrorDisposition::classify(&missing, false),
            ErrorDisposition::Respond(StatusCode::NOT_FOUND)
        );

        let fault = PlaybackError::Io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(ErrorDisposition::classify(&fault, true), ErrorDisposition::Abort);
    }
}
