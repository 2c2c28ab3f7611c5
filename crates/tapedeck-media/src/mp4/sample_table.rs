//! Progressive MP4 sample tables.
//!
//! Sample tables describe how samples are laid out in a non-fragmented file:
//! - stts: sample durations (decoding time)
//! - stss: sync sample table (keyframes)
//! - stsc: sample-to-chunk mapping
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets (for B-frames)

/// A resolved sample entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// File offset where sample data starts.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Duration in media timescale.
    pub duration: u32,
    /// Composition time offset.
    pub cts_offset: i32,
    /// Whether this sample is a sync sample.
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Get the presentation timestamp.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Resolved sample table of one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleTable {
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    /// Create a new sample table builder.
    pub fn builder() -> SampleTableBuilder {
        SampleTableBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sum of all sample durations.
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// Number of sync samples.
    pub fn keyframe_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_keyframe).count()
    }
}

/// Builder for constructing a sample table from raw atom data.
#[derive(Debug, Default)]
pub struct SampleTableBuilder {
    /// (count, delta)
    stts_entries: Vec<(u32, u32)>,
    /// 1-based sync sample numbers; `None` when stss is absent.
    sync_samples: Option<Vec<u32>>,
    /// (first_chunk, samples_per_chunk, sample_description_index)
    stsc_entries: Vec<(u32, u32, u32)>,
    uniform_size: u32,
    sample_count: u32,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    /// (count, offset)
    ctts_entries: Vec<(u32, i32)>,
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts_entries = entries;
    }

    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc_entries = entries;
    }

    /// Set stsz data. With a non-zero `uniform_size`, `sizes` is ignored.
    pub fn set_stsz(&mut self, uniform_size: u32, sample_count: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sample_count = sample_count;
        self.sample_sizes = sizes;
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts_entries = entries;
    }

    /// Resolve every sample. Tables shorter than the sample count are padded
    /// with the last known value.
    pub fn build(self) -> SampleTable {
        let count = if self.uniform_size > 0 {
            self.sample_count as usize
        } else {
            self.sample_sizes.len()
        };
        if count == 0 {
            return SampleTable::default();
        }

        let durations = expand_runs(&self.stts_entries, count, 0);
        let cts_offsets = expand_runs(&self.ctts_entries, count, 0);
        let offsets = self.resolve_offsets(count);

        let mut samples = Vec::with_capacity(count);
        let mut dts = 0u64;
        let mut sync = self.sync_samples.as_deref().unwrap_or(&[]).iter().peekable();

        for i in 0..count {
            let number = i as u32 + 1;
            let is_keyframe = match &self.sync_samples {
                None => true,
                Some(_) => {
                    while sync.next_if(|n| **n < number).is_some() {}
                    sync.next_if_eq(&&number).is_some()
                }
            };

            samples.push(SampleEntry {
                offset: offsets[i],
                size: self.size_of(i),
                dts,
                duration: durations[i],
                cts_offset: cts_offsets[i],
                is_keyframe,
            });
            dts += durations[i] as u64;
        }

        SampleTable { samples }
    }

    fn size_of(&self, index: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sample_sizes.get(index).copied().unwrap_or(0)
        }
    }

    fn resolve_offsets(&self, count: usize) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(count);
        let num_chunks = self.chunk_offsets.len() as u32;

        for (i, &(first_chunk, per_chunk, _)) in self.stsc_entries.iter().enumerate() {
            let next_first = self
                .stsc_entries
                .get(i + 1)
                .map(|e| e.0)
                .unwrap_or(num_chunks + 1);

            for chunk in first_chunk..next_first.min(num_chunks + 1) {
                let Some(&base) = self.chunk_offsets.get((chunk as usize).wrapping_sub(1)) else {
                    continue;
                };
                let mut pos = base;
                for _ in 0..per_chunk {
                    if offsets.len() == count {
                        return offsets;
                    }
                    offsets.push(pos);
                    pos += self.size_of(offsets.len() - 1) as u64;
                }
            }
        }

        while offsets.len() < count {
            offsets.push(offsets.last().copied().unwrap_or(0));
        }
        offsets
    }
}

fn expand_runs<T: Copy>(runs: &[(u32, T)], count: usize, fallback: T) -> Vec<T> {
    let mut out = Vec::with_capacity(count);
    for &(n, value) in runs {
        for _ in 0..n {
            if out.len() == count {
                return out;
            }
            out.push(value);
        }
    }
    let pad = out.last().copied().unwrap_or(fallback);
    out.resize(count, pad);
    out
}
