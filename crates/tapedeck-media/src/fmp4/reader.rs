//! Sequential reader for fragmented MP4 segments.

use super::Init;
use crate::boxes::{BoxIter, ByteReader};
use crate::mp4::{parse_moov, AtomType, Mp4Reader, TrackDefaults};
use crate::sample::NON_SYNC_BIT;
use crate::{Error, Result, Sample};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{Read, Seek};

const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
const TFHD_DEFAULT_DURATION: u32 = 0x00_0008;
const TFHD_DEFAULT_SIZE: u32 = 0x00_0010;
const TFHD_DEFAULT_FLAGS: u32 = 0x00_0020;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

const TRUN_DATA_OFFSET: u32 = 0x00_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
const TRUN_DURATION: u32 = 0x00_0100;
const TRUN_SIZE: u32 = 0x00_0200;
const TRUN_FLAGS: u32 = 0x00_0400;
const TRUN_CTS_OFFSET: u32 = 0x00_0800;

/// Upper bound on the sample count of a `trun` whose entries carry no fields.
const MAX_EMPTY_TRUN_SAMPLES: u32 = 1 << 20;

/// A sample located inside a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSample {
    /// Decode time in track timescale, relative to the segment start.
    pub dts: u64,
    pub duration: u32,
    pub cts_offset: i32,
    pub is_non_sync: bool,
    /// Absolute file offset of the payload.
    pub offset: u64,
    pub size: u32,
}

/// Runs of one track inside a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTrack {
    pub track_id: u32,
    pub samples: Vec<PartSample>,
}

/// One `moof` of a segment, with sample positions resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub sequence_number: u32,
    pub tracks: Vec<PartTrack>,
}

impl Part {
    pub fn sample_count(&self) -> usize {
        self.tracks.iter().map(|t| t.samples.len()).sum()
    }
}

/// Reads the init of a segment, then walks its fragments in file order.
///
/// A trailing fragment that is cut short (the file is still being written or
/// the recorder stopped abruptly) ends the walk without an error.
pub struct Fmp4Reader<R> {
    inner: Mp4Reader<R>,
    init: Init,
    defaults: HashMap<u32, TrackDefaults>,
    next_dts: HashMap<u32, u64>,
    pos: u64,
}

impl<R: Read + Seek> Fmp4Reader<R> {
    /// Parse `ftyp` and `moov`, leaving the reader at the first fragment.
    pub fn new(reader: R) -> Result<Self> {
        let mut inner = Mp4Reader::new(reader)?;
        let mut pos = 0;

        loop {
            let atom = inner
                .read_atom_at(pos)?
                .ok_or(Error::MissingAtom("moov"))?;
            pos = atom.end();

            match atom.atom_type {
                AtomType::MOOV => {
                    let data = inner.read_atom_data(&atom)?;
                    let movie = parse_moov(&data)?;
                    if movie.trex.is_empty() {
                        return Err(Error::unsupported("not a fragmented MP4 (no mvex)"));
                    }
                    let defaults = movie.trex.iter().map(|d| (d.track_id, *d)).collect();
                    return Ok(Self {
                        inner,
                        init: Init::from_movie(&movie),
                        defaults,
                        next_dts: HashMap::new(),
                        pos,
                    });
                }
                AtomType::MOOF | AtomType::MDAT => return Err(Error::MissingAtom("moov")),
                _ => {}
            }
        }
    }

    /// Track layout of the segment.
    pub fn init(&self) -> &Init {
        &self.init
    }

    /// Read the next fragment header.
    pub fn next_part(&mut self) -> Result<Option<Part>> {
        loop {
            let Some(atom) = self.inner.read_atom_at(self.pos)? else {
                return Ok(None);
            };
            self.pos = atom.end();

            if atom.atom_type != AtomType::MOOF {
                continue;
            }

            let data = self.inner.read_atom_data(&atom)?;
            let part = self.parse_moof(&data, atom.offset())?;

            let file_size = self.inner.file_size();
            let truncated = part
                .tracks
                .iter()
                .flat_map(|t| t.samples.iter())
                .any(|s| s.offset + s.size as u64 > file_size);
            if truncated {
                return Ok(None);
            }

            return Ok(Some(part));
        }
    }

    /// Load the payload of a sample.
    pub fn read_payload(&mut self, sample: &PartSample) -> Result<Bytes> {
        self.inner.read_at(sample.offset, sample.size)
    }

    /// Load a sample with its payload.
    pub fn read_sample(&mut self, sample: &PartSample) -> Result<Sample> {
        Ok(Sample {
            duration: sample.duration,
            cts_offset: sample.cts_offset,
            is_non_sync: sample.is_non_sync,
            payload: self.read_payload(sample)?,
        })
    }

    fn parse_moof(&mut self, data: &[u8], moof_offset: u64) -> Result<Part> {
        let mut part = Part {
            sequence_number: 0,
            tracks: Vec::new(),
        };
        let mut prev_data_end = moof_offset;

        for child in BoxIter::new(data) {
            let child = child?;
            match child.kind {
                AtomType::MFHD => {
                    let mut r = ByteReader::new(child.payload);
                    r.skip(4)?;
                    part.sequence_number = r.u32()?;
                }
                AtomType::TRAF => {
                    let is_first = part.tracks.is_empty();
                    let track = self.parse_traf(child.payload, moof_offset, is_first, prev_data_end)?;
                    if let Some(last) = track.samples.last() {
                        prev_data_end = last.offset + last.size as u64;
                    }
                    part.tracks.push(track);
                }
                _ => {}
            }
        }

        Ok(part)
    }

    fn parse_traf(
        &mut self,
        data: &[u8],
        moof_offset: u64,
        is_first: bool,
        prev_data_end: u64,
    ) -> Result<PartTrack> {
        let mut tfhd = None;
        let mut tfdt = None;
        let mut truns = Vec::new();

        for child in BoxIter::new(data) {
            let child = child?;
            match child.kind {
                AtomType::TFHD => tfhd = Some(child.payload),
                AtomType::TFDT => {
                    let mut r = ByteReader::new(child.payload);
                    let (version, _) = r.version_flags()?;
                    tfdt = Some(if version == 1 { r.u64()? } else { r.u32()? as u64 });
                }
                AtomType::TRUN => truns.push(child.payload),
                _ => {}
            }
        }

        let mut r = ByteReader::new(tfhd.ok_or(Error::MissingAtom("tfhd"))?);
        let (_, flags) = r.version_flags()?;
        let track_id = r.u32()?;
        if self.init.track(track_id).is_none() {
            return Err(Error::UnknownTrack(track_id));
        }

        let mut defaults = self.defaults.get(&track_id).copied().unwrap_or_default();
        let base_offset = if flags & TFHD_BASE_DATA_OFFSET != 0 {
            r.u64()?
        } else if flags & TFHD_DEFAULT_BASE_IS_MOOF != 0 || is_first {
            moof_offset
        } else {
            prev_data_end
        };
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            r.skip(4)?;
        }
        if flags & TFHD_DEFAULT_DURATION != 0 {
            defaults.sample_duration = r.u32()?;
        }
        if flags & TFHD_DEFAULT_SIZE != 0 {
            defaults.sample_size = r.u32()?;
        }
        if flags & TFHD_DEFAULT_FLAGS != 0 {
            defaults.sample_flags = r.u32()?;
        }

        let mut dts = match tfdt {
            Some(t) => t,
            None => self.next_dts.get(&track_id).copied().unwrap_or(0),
        };
        let mut data_pos = base_offset;
        let mut samples = Vec::new();

        for trun in truns {
            let mut r = ByteReader::new(trun);
            let (version, flags) = r.version_flags()?;
            let count = r.u32()?;
            if flags & TRUN_DATA_OFFSET != 0 {
                data_pos = base_offset
                    .checked_add_signed(r.i32()? as i64)
                    .ok_or_else(|| Error::invalid_mp4("trun data offset out of range"))?;
            }
            let first_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
                Some(r.u32()?)
            } else {
                None
            };

            let entry_size = 4 * [TRUN_DURATION, TRUN_SIZE, TRUN_FLAGS, TRUN_CTS_OFFSET]
                .iter()
                .filter(|&&f| flags & f != 0)
                .count();
            let fits = if entry_size > 0 {
                count as usize <= r.remaining() / entry_size
            } else {
                count <= MAX_EMPTY_TRUN_SAMPLES
            };
            if !fits {
                return Err(Error::invalid_mp4(format!("trun declares {count} samples")));
            }

            samples.reserve(count as usize);
            for i in 0..count {
                let duration = if flags & TRUN_DURATION != 0 { r.u32()? } else { defaults.sample_duration };
                let size = if flags & TRUN_SIZE != 0 { r.u32()? } else { defaults.sample_size };
                let sample_flags = if flags & TRUN_FLAGS != 0 {
                    r.u32()?
                } else if i == 0 {
                    first_flags.unwrap_or(defaults.sample_flags)
                } else {
                    defaults.sample_flags
                };
                let cts_offset = if flags & TRUN_CTS_OFFSET != 0 {
                    let raw = r.u32()?;
                    if version == 0 { raw.min(i32::MAX as u32) as i32 } else { raw as i32 }
                } else {
                    0
                };

                samples.push(PartSample {
                    dts,
                    duration,
                    cts_offset,
                    is_non_sync: sample_flags & NON_SYNC_BIT != 0,
                    offset: data_pos,
                    size,
                });
                dts = dts
                    .checked_add(duration as u64)
                    .ok_or_else(|| Error::invalid_mp4("decode time overflow"))?;
                data_pos = data_pos
                    .checked_add(size as u64)
                    .ok_or_else(|| Error::invalid_mp4("sample offset overflow"))?;
            }
        }

        self.next_dts.insert(track_id, dts);
        Ok(PartTrack { track_id, samples })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{begin_box, begin_full_box, end_box};
    use crate::fmp4::{Fragment, FragmentTrack, InitTrack};
    use bytes::{BufMut, BytesMut};
    use std::io::Cursor;

    fn init() -> Init {
        Init::new(vec![
            InitTrack::avc(1, 90_000, 640, 480, &[1, 2, 3]),
            InitTrack::aac(2, 44_100, 1, &[0, 0, 0, 0, 3]),
        ])
    }

    fn sample(duration: u32, payload: &[u8], is_non_sync: bool, cts_offset: i32) -> Sample {
        Sample {
            duration,
            cts_offset,
            is_non_sync,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    fn segment() -> Vec<u8> {
        let mut file = init().marshal().to_vec();

        let mut f1 = Fragment::new(1);
        let mut v = FragmentTrack::new(1, 0);
        v.samples.push(sample(3000, b"I0", false, 3000));
        v.samples.push(sample(3000, b"P1", true, -1500));
        let mut a = FragmentTrack::new(2, 0);
        a.samples.push(sample(1024, b"A0", false, 0));
        f1.tracks = vec![v, a];
        file.extend_from_slice(&f1.marshal());

        let mut f2 = Fragment::new(2);
        let mut v = FragmentTrack::new(1, 6000);
        v.samples.push(sample(3000, b"P2", true, 0));
        f2.tracks = vec![v];
        file.extend_from_slice(&f2.marshal());

        file
    }

    #[test]
    fn test_walk_parts() {
        let mut reader = Fmp4Reader::new(Cursor::new(segment())).unwrap();
        assert_eq!(reader.init(), &init());

        let part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.sequence_number, 1);
        assert_eq!(part.tracks.len(), 2);
        assert_eq!(part.sample_count(), 3);

        let video = &part.tracks[0];
        assert_eq!(video.track_id, 1);
        assert_eq!(video.samples[1].dts, 3000);
        assert!(video.samples[1].is_non_sync);
        assert_eq!(video.samples[1].cts_offset, -1500);
        assert_eq!(reader.read_payload(&video.samples[0]).unwrap(), &b"I0"[..]);
        assert_eq!(reader.read_payload(&video.samples[1]).unwrap(), &b"P1"[..]);

        let audio = part.tracks[1].samples[0];
        assert!(!audio.is_non_sync);
        assert_eq!(reader.read_payload(&audio).unwrap(), &b"A0"[..]);

        let part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.sequence_number, 2);
        let s = reader.read_sample(&part.tracks[0].samples[0]).unwrap();
        assert_eq!(s.payload, &b"P2"[..]);
        assert_eq!(part.tracks[0].samples[0].dts, 6000);

        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_truncated_tail_ends_walk() {
        let mut data = segment();
        data.truncate(data.len() - 1);

        let mut reader = Fmp4Reader::new(Cursor::new(data)).unwrap();
        assert!(reader.next_part().unwrap().is_some());
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_missing_moov() {
        let err = Fmp4Reader::new(Cursor::new(Vec::new())).err().unwrap();
        assert!(matches!(err, Error::MissingAtom("moov")));
    }

    #[test]
    fn test_unknown_track_in_fragment() {
        let mut file = init().marshal().to_vec();
        let mut f = Fragment::new(1);
        let mut t = FragmentTrack::new(9, 0);
        t.samples.push(sample(1, b"x", false, 0));
        f.tracks.push(t);
        file.extend_from_slice(&f.marshal());

        let mut reader = Fmp4Reader::new(Cursor::new(file)).unwrap();
        assert!(matches!(reader.next_part(), Err(Error::UnknownTrack(9))));
    }

    /// Init followed by a hand-built `moof` for track 1 with one `trun`.
    fn crafted(
        base_time: u64,
        default_duration: u32,
        trun_flags: u32,
        count: u32,
        entries: &[u32],
    ) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let moof = begin_box(&mut buf, b"moof");
        let mfhd = begin_full_box(&mut buf, b"mfhd", 0, 0);
        buf.put_u32(1);
        end_box(&mut buf, mfhd);

        let traf = begin_box(&mut buf, b"traf");
        let tfhd_flags = TFHD_DEFAULT_BASE_IS_MOOF | TFHD_DEFAULT_DURATION;
        let tfhd = begin_full_box(&mut buf, b"tfhd", 0, tfhd_flags);
        buf.put_u32(1);
        buf.put_u32(default_duration);
        end_box(&mut buf, tfhd);
        let tfdt = begin_full_box(&mut buf, b"tfdt", 1, 0);
        buf.put_u64(base_time);
        end_box(&mut buf, tfdt);
        let trun = begin_full_box(&mut buf, b"trun", 0, trun_flags);
        buf.put_u32(count);
        for &entry in entries {
            buf.put_u32(entry);
        }
        end_box(&mut buf, trun);
        end_box(&mut buf, traf);
        end_box(&mut buf, moof);

        let mut file = init().marshal().to_vec();
        file.extend_from_slice(&buf);
        file
    }

    #[test]
    fn test_trun_count_beyond_entries() {
        // Four entries declared, one present.
        let file = crafted(0, 3000, TRUN_SIZE, 4, &[10]);
        let mut reader = Fmp4Reader::new(Cursor::new(file)).unwrap();
        assert!(matches!(reader.next_part(), Err(Error::InvalidMp4(_))));
    }

    #[test]
    fn test_trun_huge_count_without_fields() {
        let file = crafted(0, 3000, 0, u32::MAX, &[]);
        let mut reader = Fmp4Reader::new(Cursor::new(file)).unwrap();
        assert!(matches!(reader.next_part(), Err(Error::InvalidMp4(_))));
    }

    #[test]
    fn test_decode_time_overflow() {
        let file = crafted(u64::MAX - 10, 3000, 0, 2, &[]);
        let mut reader = Fmp4Reader::new(Cursor::new(file)).unwrap();
        assert!(matches!(reader.next_part(), Err(Error::InvalidMp4(_))));
    }
}
