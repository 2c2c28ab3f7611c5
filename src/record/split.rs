//! Replays an existing fragmented MP4 file through the recorder.

use super::{Fmp4Recorder, RecordSample, RecorderConfig, SegmentEvents};
use crate::config::PathConfig;
use chrono::{DateTime, TimeDelta, Utc};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tapedeck_common::time::from_timescale;
use tapedeck_media::{Error, Fmp4Reader, Result};

/// Cut `input` into segments of `stream` as configured by `path`, treating the
/// first decode time of the file as `start`. Returns the number of samples
/// fed to the recorder.
pub fn split_file(
    input: &Path,
    stream: &str,
    path: &PathConfig,
    start: DateTime<Utc>,
    events: Arc<dyn SegmentEvents>,
) -> Result<usize> {
    let mut reader = Fmp4Reader::new(BufReader::new(File::open(input)?))?;
    let init = reader.init().clone();

    let config = RecorderConfig {
        stream: stream.to_string(),
        template: path.template(),
        segment_duration: path.segment_duration(),
        part_duration: path.part_duration(),
    };
    let mut recorder = Fmp4Recorder::new(config, init.clone(), events)?;

    let mut fed = 0;
    while let Some(part) = reader.next_part()? {
        let mut batch = Vec::with_capacity(part.sample_count());
        for track in &part.tracks {
            let timescale = init
                .track(track.track_id)
                .map(|t| t.timescale)
                .ok_or(Error::UnknownTrack(track.track_id))?;
            for s in &track.samples {
                batch.push((from_timescale(s.dts as i64, timescale), track.track_id, *s));
            }
        }
        // Stable, so tracks keep their order on equal decode times.
        batch.sort_by_key(|&(dts, _, _)| dts);

        for (dts, track_id, s) in batch {
            let sample = reader.read_sample(&s)?;
            recorder.write_sample(
                track_id,
                dts,
                start + dts,
                RecordSample {
                    payload: sample.payload,
                    cts_offset: sample.cts_offset,
                    is_non_sync: sample.is_non_sync,
                },
            )?;
            fed += 1;
        }
    }

    recorder.close()?;
    tracing::debug!(input = ?input, samples = fed, "split complete");
    Ok(fed)
}

/// Decode time reached by a file, for callers that want the wall-clock end.
pub fn file_duration(input: &Path) -> Result<TimeDelta> {
    let mut reader = Fmp4Reader::new(BufReader::new(File::open(input)?))?;
    let init = reader.init().clone();

    let mut end = TimeDelta::zero();
    while let Some(part) = reader.next_part()? {
        for track in &part.tracks {
            let Some(timescale) = init.track(track.track_id).map(|t| t.timescale) else {
                continue;
            };
            if let Some(last) = track.samples.last() {
                end = end.max(from_timescale(
                    (last.dts + last.duration as u64) as i64,
                    timescale,
                ));
            }
        }
    }
    Ok(end)
}
