//! Playback routes.
//!
//! `GET /get?path=&start=&duration=&format=` streams the requested part of a
//! recorded stream as a single MP4 body.

use crate::playback::{
    seek_and_mux, ErrorDisposition, OutputMuxer, PlaybackError, PlaybackWindow, ResponseWriter,
    Segment,
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tapedeck_common::time::parse_duration;
use tapedeck_common::OutputFormat;
use tokio_stream::wrappers::ReceiverStream;

use super::AppContext;

/// Body chunks buffered between the muxer thread and the connection.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Create playback routes.
pub fn playback_routes() -> Router<AppContext> {
    Router::new().route("/get", get(get_recording))
}

#[derive(Debug, Deserialize)]
pub struct GetQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub format: String,
}

/// A validated playback request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub path: String,
    pub window: PlaybackWindow,
    pub format: OutputFormat,
}

impl TryFrom<GetQuery> for PlaybackRequest {
    type Error = PlaybackError;

    fn try_from(query: GetQuery) -> Result<Self, PlaybackError> {
        let start = DateTime::parse_from_rfc3339(&query.start)
            .map_err(|e| PlaybackError::InvalidStart(e.to_string()))?
            .with_timezone(&Utc);
        let duration =
            parse_duration(&query.duration).map_err(|e| PlaybackError::InvalidDuration(e.to_string()))?;
        if duration <= TimeDelta::zero() {
            return Err(PlaybackError::InvalidDuration(
                "duration must be positive".to_string(),
            ));
        }
        let format = query
            .format
            .parse::<OutputFormat>()
            .map_err(PlaybackError::InvalidFormat)?;

        Ok(Self {
            path: query.path,
            window: PlaybackWindow::new(start, duration),
            format,
        })
    }
}

async fn get_recording(
    State(ctx): State<AppContext>,
    Query(query): Query<GetQuery>,
) -> Response {
    match serve(ctx, query).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(code = e.code(), "playback request failed: {}", e);
            e.into_response()
        }
    }
}

async fn serve(ctx: AppContext, query: GetQuery) -> Result<Response, PlaybackError> {
    let req = PlaybackRequest::try_from(query)?;

    let path_conf = ctx
        .config
        .find_path(&req.path)
        .filter(|p| p.playback)
        .ok_or_else(|| PlaybackError::PathNotFound(req.path.clone()))?;
    let record_format = path_conf.record_format;

    let recordings = ctx
        .inventory
        .find_segments(&req.path, req.window.start, req.window.duration)
        .await
        .map_err(|e| PlaybackError::Inventory(format!("{:#}", e)))?;
    if recordings.is_empty() {
        return Err(PlaybackError::NoSegments);
    }
    let segments = recordings
        .iter()
        .map(Segment::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        path = %req.path,
        start = %req.window.start,
        duration_ms = req.window.duration.num_milliseconds(),
        format = %req.format,
        segments = segments.len(),
        "serving recording"
    );

    let (writer, mut parts) = ResponseWriter::channel(BODY_CHANNEL_CAPACITY);
    let tolerance = ctx.config.playback.tolerance();
    let window = req.window;
    let format = req.format;

    let job = tokio::task::spawn_blocking(move || {
        let mut muxer = OutputMuxer::new(format, writer);
        let result = seek_and_mux(record_format, &segments, window, &mut muxer, tolerance);
        let writer = muxer.into_inner();
        let written = writer.has_written();
        if let Err(e) = &result {
            if written && !e.is_client_abort() {
                writer.abort(&e.to_string());
            }
        }
        (result, written)
    });

    // Headers arrive with the first byte; a dropped sender means the engine
    // finished without writing anything.
    match (&mut parts.headers).await {
        Ok(headers) => {
            let path = req.path.clone();
            tokio::spawn(async move {
                match job.await {
                    Ok((Ok(()), _)) => tracing::debug!(path = %path, "playback complete"),
                    Ok((Err(e), written)) => log_failure(&path, &e, written),
                    Err(e) => tracing::error!(path = %path, "playback task failed: {}", e),
                }
            });

            let body = Body::from_stream(ReceiverStream::new(parts.body));
            Ok((StatusCode::OK, headers, body).into_response())
        }
        Err(_) => match job.await {
            Ok((Ok(()), _)) => Err(PlaybackError::NoSegments),
            Ok((Err(e), written)) => {
                if let ErrorDisposition::ClientGone = ErrorDisposition::classify(&e, written) {
                    tracing::trace!(path = %req.path, "client went away");
                }
                Err(e)
            }
            Err(e) => Err(PlaybackError::Task(e.to_string())),
        },
    }
}

fn log_failure(path: &str, err: &PlaybackError, written: bool) {
    match ErrorDisposition::classify(err, written) {
        ErrorDisposition::ClientGone => tracing::trace!(path, "client went away"),
        ErrorDisposition::Respond(status) => {
            tracing::warn!(path, %status, "playback failed: {}", err)
        }
        ErrorDisposition::Abort => {
            tracing::error!(path, "playback aborted mid-stream: {}", err)
        }
    }
}
