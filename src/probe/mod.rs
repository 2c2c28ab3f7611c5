//! Segment inspection for the `probe` command.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tapedeck_media::{Fmp4Reader, Mp4File};

/// Summary of a segment or progressive MP4 file.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub path: PathBuf,
    pub fragmented: bool,
    pub fragments: usize,
    pub duration_secs: f64,
    pub tracks: Vec<TrackReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    pub id: u32,
    pub handler: String,
    pub codec: String,
    pub timescale: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<(u32, u32)>,
    pub samples: usize,
    pub keyframes: usize,
    pub bytes: u64,
    pub duration_secs: f64,
}

#[derive(Default)]
struct Tally {
    samples: usize,
    keyframes: usize,
    bytes: u64,
    end: u64,
}

/// Inspect a file: the init and every fragment of a segment, or the sample
/// tables of a progressive MP4.
pub fn probe_file(path: &Path) -> Result<ProbeReport> {
    let movie = Mp4File::open(path).with_context(|| format!("Failed to parse {:?}", path))?;
    if movie.is_fragmented() {
        return probe_fragmented(path, &movie);
    }

    let tracks = movie
        .tracks
        .iter()
        .map(|t| TrackReport {
            id: t.track_id,
            handler: t.handler_type.to_string(),
            codec: t.codec().map(|c| c.to_string()).unwrap_or_default(),
            timescale: t.timescale,
            resolution: (t.width > 0).then_some((t.width, t.height)),
            samples: t.sample_table.len(),
            keyframes: t.sample_table.keyframe_count(),
            bytes: t.sample_table.samples.iter().map(|s| s.size as u64).sum(),
            duration_secs: t.duration_secs(),
        })
        .collect();

    Ok(ProbeReport {
        path: path.to_path_buf(),
        fragmented: false,
        fragments: 0,
        duration_secs: movie.duration_secs(),
        tracks,
    })
}

fn probe_fragmented(path: &Path, movie: &Mp4File) -> Result<ProbeReport> {
    let file = File::open(path)?;
    let mut reader = Fmp4Reader::new(BufReader::new(file))?;

    let mut tallies: BTreeMap<u32, Tally> = BTreeMap::new();
    let mut fragments = 0;
    while let Some(part) = reader.next_part()? {
        fragments += 1;
        for track in &part.tracks {
            let tally = tallies.entry(track.track_id).or_default();
            for s in &track.samples {
                tally.samples += 1;
                tally.keyframes += usize::from(!s.is_non_sync);
                tally.bytes += s.size as u64;
                tally.end = tally.end.max(s.dts + s.duration as u64);
            }
        }
    }

    let tracks: Vec<TrackReport> = reader
        .init()
        .tracks
        .iter()
        .map(|t| {
            let tally = tallies.remove(&t.id).unwrap_or_default();
            TrackReport {
                id: t.id,
                handler: t.handler.to_string(),
                codec: t.codec().to_string(),
                timescale: t.timescale,
                resolution: (t.width > 0).then_some((t.width, t.height)),
                samples: tally.samples,
                keyframes: tally.keyframes,
                bytes: tally.bytes,
                duration_secs: tally.end as f64 / t.timescale.max(1) as f64,
            }
        })
        .collect();

    let duration_secs = tracks.iter().map(|t| t.duration_secs).fold(0.0, f64::max);
    tracing::debug!(path = ?path, fragments, declared = movie.fragment_count, "walked fragments");

    Ok(ProbeReport {
        path: path.to_path_buf(),
        fragmented: true,
        fragments,
        duration_secs,
        tracks,
    })
}
