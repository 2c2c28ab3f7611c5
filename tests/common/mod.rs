//! Shared test harness for integration tests.
//!
//! Provides synthetic segment files written through the media crate, a
//! static [`Inventory`], and [`TestServer`] which starts Axum on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use tapedeck::config::{Config, PathConfig};
use tapedeck::inventory::{Inventory, RecordingDescriptor};
use tapedeck::playback::Segment;
use tapedeck::server::{create_router, AppContext};
use tapedeck_common::paths::PathTemplate;
use tapedeck_common::RecordFormat;
use tapedeck_media::{Fragment, FragmentTrack, Init, InitTrack, Sample};

/// Video frames per second in synthetic segments.
pub const FPS: i64 = 10;
/// Ticks per frame at 90 kHz.
pub const FRAME_TICKS: u32 = 9000;

/// Fixed reference instant.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 8, 17, 0, 0).unwrap()
}

pub fn at(ms: i64) -> DateTime<Utc> {
    epoch() + TimeDelta::milliseconds(ms)
}

pub fn video_init(width: u16) -> Init {
    Init::new(vec![InitTrack::avc(1, 90_000, width, 360, &[1, 0x42, 0, 0x1e])])
}

/// Segment with one fragment per second: 10 fps video, keyframe on every
/// second, payloads tagged with the frame index.
pub fn segment_bytes(init: &Init, seconds: u32) -> Vec<u8> {
    padded_segment_bytes(init, seconds, 4)
}

/// Like [`segment_bytes`], with every payload zero-padded to `payload_len`.
pub fn padded_segment_bytes(init: &Init, seconds: u32, payload_len: usize) -> Vec<u8> {
    let mut data = init.marshal().to_vec();
    for sec in 0..seconds {
        let mut track = FragmentTrack::new(1, sec as u64 * 90_000);
        track.samples = (0..FPS as u32)
            .map(|i| {
                let mut payload = (sec * FPS as u32 + i).to_be_bytes().to_vec();
                payload.resize(payload_len.max(4), 0);
                Sample {
                    duration: FRAME_TICKS,
                    cts_offset: 0,
                    is_non_sync: i != 0,
                    payload: Bytes::from(payload),
                }
            })
            .collect();
        let fragment = Fragment {
            sequence_number: sec + 1,
            tracks: vec![track],
        };
        data.extend_from_slice(&fragment.marshal());
    }
    data
}

/// Record template rooted in `dir`.
pub fn template(dir: &Path) -> PathTemplate {
    PathTemplate::new(format!("{}/%path/%Y-%m-%d_%H-%M-%S-%f", dir.display()))
}

/// Write a synthetic segment of `stream` starting at `start`.
pub fn write_segment(
    dir: &Path,
    stream: &str,
    start: DateTime<Utc>,
    seconds: u32,
    init: &Init,
) -> Segment {
    write_raw_segment(dir, stream, start, &segment_bytes(init, seconds))
}

/// Write a synthetic segment with large payloads, so that the fMP4 muxer
/// emits fragments before the segment ends.
pub fn write_heavy_segment(
    dir: &Path,
    stream: &str,
    start: DateTime<Utc>,
    seconds: u32,
    init: &Init,
) -> Segment {
    write_raw_segment(dir, stream, start, &padded_segment_bytes(init, seconds, 64 * 1024))
}

/// Write arbitrary bytes where the segment of `stream` starting at `start` lives.
pub fn write_raw_segment(dir: &Path, stream: &str, start: DateTime<Utc>, data: &[u8]) -> Segment {
    let path = template(dir).encode(stream, start, RecordFormat::Fmp4);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, data).unwrap();
    Segment::new(path, start)
}

pub fn descriptor(segment: &Segment, seconds: f64) -> RecordingDescriptor {
    RecordingDescriptor {
        path: segment.path.to_string_lossy().into_owned(),
        duration: seconds,
        start: segment.start.to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

/// Config whose catch-all path records into `dir`.
pub fn config_for(dir: &Path) -> Config {
    let mut config = Config::default();
    config.paths = vec![PathConfig::new("all_others").with_record_path(template(dir).as_str())];
    config
}

/// Inventory answering every query with the same list.
pub struct StaticInventory(pub Vec<RecordingDescriptor>);

#[async_trait]
impl Inventory for StaticInventory {
    async fn find_segments(
        &self,
        _stream: &str,
        _start: DateTime<Utc>,
        _duration: TimeDelta,
    ) -> anyhow::Result<Vec<RecordingDescriptor>> {
        Ok(self.0.clone())
    }
}

/// Axum server on a random port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
}

impl TestServer {
    pub async fn start(ctx: AppContext) -> Self {
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            client: reqwest::Client::new(),
        }
    }

    pub async fn with_inventory(config: Config, inventory: Arc<dyn Inventory>) -> Self {
        Self::start(AppContext::with_inventory(config, inventory)).await
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    pub async fn get(&self, path_and_query: &str) -> reqwest::Response {
        self.client
            .get(self.url(path_and_query))
            .send()
            .await
            .expect("request failed")
    }
}

/// Query string for `/get`.
pub fn get_query(stream: &str, start: DateTime<Utc>, duration: &str, format: &str) -> String {
    format!(
        "/get?path={}&start={}&duration={}&format={}",
        stream,
        start.to_rfc3339_opts(SecondsFormat::Millis, true),
        duration,
        format
    )
}

/// Decode times (in ticks) of every sample of track 1 in an fMP4 body.
pub fn fmp4_video_dts(body: &[u8]) -> Vec<u64> {
    let mut reader = tapedeck_media::Fmp4Reader::new(std::io::Cursor::new(body)).unwrap();
    let mut dts = Vec::new();
    while let Some(part) = reader.next_part().unwrap() {
        for track in part.tracks.iter().filter(|t| t.track_id == 1) {
            dts.extend(track.samples.iter().map(|s| s.dts));
        }
    }
    dts
}
