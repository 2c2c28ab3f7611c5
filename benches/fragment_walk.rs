//! Benchmarks for segment reading and playback muxing
//!
//! Walks the fragments of an in-memory segment and muxes a window out of it.

use bytes::Bytes;
use chrono::TimeDelta;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::{self, Cursor};
use tapedeck::playback::{Muxer, OutputMuxer};
use tapedeck_common::OutputFormat;
use tapedeck_media::{Fmp4Reader, Fragment, FragmentTrack, Init, InitTrack, Sample};

/// One fragment per second of 30 fps video plus 50 AAC frames.
fn build_segment(seconds: u32) -> Vec<u8> {
    let init = Init::new(vec![
        InitTrack::avc(1, 90_000, 1920, 1080, &[1, 0x64, 0, 0x28]),
        InitTrack::aac(2, 48_000, 2, &[0, 0, 0, 0]),
    ]);
    let mut data = init.marshal().to_vec();

    for sec in 0..seconds {
        let mut video = FragmentTrack::new(1, sec as u64 * 90_000);
        video.samples = (0..30)
            .map(|i| Sample {
                duration: 3000,
                cts_offset: 0,
                is_non_sync: i != 0,
                payload: Bytes::from(vec![0u8; if i == 0 { 40_000 } else { 4_000 }]),
            })
            .collect();

        let mut audio = FragmentTrack::new(2, sec as u64 * 48_000);
        audio.samples = (0..50)
            .map(|_| Sample {
                duration: 960,
                cts_offset: 0,
                is_non_sync: false,
                payload: Bytes::from(vec![0u8; 256]),
            })
            .collect();

        let fragment = Fragment {
            sequence_number: sec + 1,
            tracks: vec![video, audio],
        };
        data.extend_from_slice(&fragment.marshal());
    }
    data
}

fn bench_walk_parts(c: &mut Criterion) {
    let mut group = c.benchmark_group("walk_parts");

    for seconds in [10u32, 60, 300] {
        let data = build_segment(seconds);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(seconds), &data, |b, data| {
            b.iter(|| {
                let mut reader = Fmp4Reader::new(Cursor::new(data.as_slice())).unwrap();
                let mut samples = 0;
                while let Some(part) = reader.next_part().unwrap() {
                    samples += part.sample_count();
                }
                black_box(samples)
            })
        });
    }

    group.finish();
}

fn bench_mux_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("mux_window");
    let data = build_segment(60);

    for format in [OutputFormat::Fmp4, OutputFormat::Mp4] {
        group.bench_function(format.to_string(), |b| {
            b.iter(|| {
                let mut reader = Fmp4Reader::new(Cursor::new(data.as_slice())).unwrap();
                let mut muxer = OutputMuxer::new(format, io::sink());
                muxer.write_init(reader.init()).unwrap();
                let elapsed = muxer
                    .mux_range(
                        &mut reader,
                        TimeDelta::seconds(-20),
                        TimeDelta::seconds(30),
                    )
                    .unwrap();
                muxer.flush().unwrap();
                black_box(elapsed)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_walk_parts, bench_mux_window);
criterion_main!(benches);
