//! Per-track sample buffering shared by the output muxers.

use tapedeck_media::Sample;

/// What a [`TrackBuffer`] needs from the samples it holds.
pub(crate) trait Timed {
    fn is_non_sync(&self) -> bool;
    fn set_duration(&mut self, duration: u32);
    /// Bytes held in memory for the sample.
    fn buffered_size(&self) -> usize;
}

impl Timed for Sample {
    fn is_non_sync(&self) -> bool {
        self.is_non_sync
    }

    fn set_duration(&mut self, duration: u32) {
        self.duration = duration;
    }

    fn buffered_size(&self) -> usize {
        self.payload.len()
    }
}

/// A sample placed on the output timeline.
#[derive(Debug, Clone)]
pub(crate) struct BufferedSample<S = Sample> {
    /// Output decode time in track timescale, never negative.
    pub dts: u64,
    pub sample: S,
}

/// Collects the samples of one track until the muxer emits them.
///
/// Samples arrive with their decode time relative to the window start and may
/// lie before it. Only the GOP covering the window start survives: a sync
/// sample before the start, or the first sync sample at or after it while
/// only earlier samples are buffered, discards what is buffered.
#[derive(Debug)]
pub(crate) struct TrackBuffer<S = Sample> {
    pub id: u32,
    pub timescale: u32,
    samples: Vec<BufferedSample<S>>,
    started: bool,
    /// Raw decode time of the latest sample.
    last_raw: Option<i64>,
    /// Output decode time of the latest sample.
    last_dts: u64,
}

impl<S: Timed> TrackBuffer<S> {
    pub fn new(id: u32, timescale: u32) -> Self {
        Self {
            id,
            timescale,
            samples: Vec::new(),
            started: false,
            last_raw: None,
            last_dts: 0,
        }
    }

    pub fn push(&mut self, dts: i64, sample: S) {
        if sample.is_non_sync() {
            if !self.started {
                return;
            }
        } else {
            if dts < 0 || self.in_preroll() {
                self.samples.clear();
            }
            self.started = true;
        }

        let out = (dts.max(0) as u64).max(self.last_dts);
        if let Some(prev) = self.samples.last_mut() {
            prev.sample.set_duration((out - prev.dts).min(u32::MAX as u64) as u32);
        }

        self.samples.push(BufferedSample { dts: out, sample });
        self.last_raw = Some(dts);
        self.last_dts = out;
    }

    /// Buffered samples all lie before the window start and may still be
    /// replaced by a later GOP.
    pub fn in_preroll(&self) -> bool {
        self.last_raw.is_some_and(|d| d < 0)
    }

    /// A sample at or after the window start has been buffered.
    pub fn reached_window(&self) -> bool {
        self.last_raw.is_some_and(|d| d >= 0)
    }

    pub fn payload_size(&self) -> usize {
        self.samples.iter().map(|s| s.sample.buffered_size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Hand the buffered samples to the muxer.
    pub fn take(&mut self) -> Vec<BufferedSample<S>> {
        std::mem::take(&mut self.samples)
    }
}
