//! Initialization segment (`ftyp` + `moov`) model.

use crate::boxes::{
    begin_box, begin_full_box, end_box, put_dinf, put_hdlr, put_matrix, put_media_header, BoxIter,
};
use crate::mp4::{parse_moov, AtomType, HandlerType, Mp4File, TrackInfo};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Movie timescale used in headers we write.
pub(crate) const MOVIE_TIMESCALE: u32 = 1000;

/// One track of an initialization segment.
///
/// Two tracks are interchangeable when every field matches, sample entry
/// bytes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitTrack {
    pub id: u32,
    pub timescale: u32,
    pub handler: HandlerType,
    pub width: u32,
    pub height: u32,
    /// Sample description entry, box header included.
    pub sample_entry: Bytes,
}

impl InitTrack {
    /// H.264 video track with an `avc1` entry wrapping the given `avcC` payload.
    pub fn avc(id: u32, timescale: u32, width: u16, height: u16, avcc: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(86 + 8 + avcc.len());
        let start = begin_box(&mut buf, b"avc1");
        buf.put_slice(&[0; 6]); // reserved
        buf.put_u16(1); // data reference index
        buf.put_u16(0); // pre_defined
        buf.put_u16(0); // reserved
        buf.put_slice(&[0; 12]); // pre_defined
        buf.put_u16(width);
        buf.put_u16(height);
        buf.put_u32(0x0048_0000); // 72 dpi
        buf.put_u32(0x0048_0000);
        buf.put_u32(0); // reserved
        buf.put_u16(1); // frame count
        buf.put_slice(&[0; 32]); // compressor name
        buf.put_u16(0x0018); // depth
        buf.put_i16(-1); // pre_defined
        let avcc_start = begin_box(&mut buf, b"avcC");
        buf.put_slice(avcc);
        end_box(&mut buf, avcc_start);
        end_box(&mut buf, start);

        Self {
            id,
            timescale,
            handler: HandlerType::Video,
            width: width as u32,
            height: height as u32,
            sample_entry: buf.freeze(),
        }
    }

    /// AAC audio track with an `mp4a` entry wrapping the given `esds` payload
    /// (version and flags included). The timescale is the sample rate.
    pub fn aac(id: u32, sample_rate: u32, channels: u16, esds: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(36 + 8 + esds.len());
        let start = begin_box(&mut buf, b"mp4a");
        buf.put_slice(&[0; 6]); // reserved
        buf.put_u16(1); // data reference index
        buf.put_slice(&[0; 8]); // reserved
        buf.put_u16(channels);
        buf.put_u16(16); // sample size
        buf.put_u16(0); // pre_defined
        buf.put_u16(0); // reserved
        buf.put_u32(sample_rate.min(0xFFFF) << 16);
        let esds_start = begin_box(&mut buf, b"esds");
        buf.put_slice(esds);
        end_box(&mut buf, esds_start);
        end_box(&mut buf, start);

        Self {
            id,
            timescale: sample_rate,
            handler: HandlerType::Audio,
            width: 0,
            height: 0,
            sample_entry: buf.freeze(),
        }
    }

    /// Four-character code of the sample entry (`avc1`, `mp4a`, ...).
    pub fn codec(&self) -> AtomType {
        match self.sample_entry.get(4..8) {
            Some(raw) => AtomType::from_bytes([raw[0], raw[1], raw[2], raw[3]]),
            None => AtomType(*b"????"),
        }
    }

    fn from_track_info(track: &TrackInfo) -> Self {
        Self {
            id: track.track_id,
            timescale: track.timescale,
            handler: track.handler_type,
            width: track.width,
            height: track.height,
            sample_entry: track.sample_entry.clone(),
        }
    }
}

/// Track layout of a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Init {
    pub tracks: Vec<InitTrack>,
}

impl Init {
    pub fn new(tracks: Vec<InitTrack>) -> Self {
        Self { tracks }
    }

    /// Track by ID.
    pub fn track(&self, id: u32) -> Option<&InitTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Index of a track in `tracks`.
    pub fn position(&self, id: u32) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    /// The track whose sync samples drive segmentation: the first video
    /// track, else the first track.
    pub fn leading_track(&self) -> Option<&InitTrack> {
        self.tracks
            .iter()
            .find(|t| t.handler.is_video())
            .or_else(|| self.tracks.first())
    }

    /// Build from a parsed movie.
    pub fn from_movie(movie: &Mp4File) -> Self {
        Self {
            tracks: movie.tracks.iter().map(InitTrack::from_track_info).collect(),
        }
    }

    /// Parse serialized `ftyp` + `moov` bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        for b in BoxIter::new(data) {
            let b = b?;
            if b.kind == AtomType::MOOV {
                return Ok(Self::from_movie(&parse_moov(b.payload)?));
            }
        }
        Err(Error::MissingAtom("moov"))
    }

    /// Serialize as a fragmented MP4 initialization segment.
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(512 + self.tracks.len() * 512);

        put_ftyp(&mut buf, b"iso5", &[b"iso5", b"iso6", b"mp41"]);

        let moov = begin_box(&mut buf, b"moov");
        put_mvhd(&mut buf, 0, self.next_track_id());
        for track in &self.tracks {
            write_trak(&mut buf, track, 0, 0, |buf| {
                put_empty_table(buf, b"stts");
                put_empty_table(buf, b"stsc");
                let stsz = begin_full_box(buf, b"stsz", 0, 0);
                buf.put_u32(0); // sample size
                buf.put_u32(0); // sample count
                end_box(buf, stsz);
                put_empty_table(buf, b"stco");
            });
        }

        let mvex = begin_box(&mut buf, b"mvex");
        for track in &self.tracks {
            let trex = begin_full_box(&mut buf, b"trex", 0, 0);
            buf.put_u32(track.id);
            buf.put_u32(1); // default sample description index
            buf.put_u32(0); // default sample duration
            buf.put_u32(0); // default sample size
            buf.put_u32(0); // default sample flags
            end_box(&mut buf, trex);
        }
        end_box(&mut buf, mvex);
        end_box(&mut buf, moov);

        buf.freeze()
    }

    pub(crate) fn next_track_id(&self) -> u32 {
        self.tracks.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }
}

pub(crate) fn put_ftyp(buf: &mut BytesMut, major: &[u8; 4], compatible: &[&[u8; 4]]) {
    let start = begin_box(buf, b"ftyp");
    buf.put_slice(major);
    buf.put_u32(0x200); // minor version
    for brand in compatible {
        buf.put_slice(*brand);
    }
    end_box(buf, start);
}

pub(crate) fn put_mvhd(buf: &mut BytesMut, duration: u64, next_track_id: u32) {
    let start = begin_full_box(buf, b"mvhd", 1, 0);
    buf.put_u64(0); // creation time
    buf.put_u64(0); // modification time
    buf.put_u32(MOVIE_TIMESCALE);
    buf.put_u64(duration);
    buf.put_u32(0x0001_0000); // rate 1.0
    buf.put_u16(0x0100); // volume 1.0
    buf.put_slice(&[0; 10]); // reserved
    put_matrix(buf);
    buf.put_slice(&[0; 24]); // pre_defined
    buf.put_u32(next_track_id);
    end_box(buf, start);
}

fn put_empty_table(buf: &mut BytesMut, kind: &[u8; 4]) {
    let start = begin_full_box(buf, kind, 0, 0);
    buf.put_u32(0); // entry count
    end_box(buf, start);
}

/// Write a complete `trak`. `tables` appends the boxes following `stsd`.
///
/// `movie_delay` (movie timescale) inserts an empty edit so the track starts
/// that late on the movie timeline.
pub(crate) fn write_trak(
    buf: &mut BytesMut,
    track: &InitTrack,
    media_duration: u64,
    movie_delay: u64,
    tables: impl FnOnce(&mut BytesMut),
) {
    let movie_duration = media_duration * MOVIE_TIMESCALE as u64 / track.timescale.max(1) as u64;

    let trak = begin_box(buf, b"trak");

    let tkhd = begin_full_box(buf, b"tkhd", 1, 0x3); // enabled, in movie
    buf.put_u64(0); // creation time
    buf.put_u64(0); // modification time
    buf.put_u32(track.id);
    buf.put_u32(0); // reserved
    buf.put_u64(movie_delay + movie_duration);
    buf.put_u64(0); // reserved
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    buf.put_u16(if track.handler.is_audio() { 0x0100 } else { 0 });
    buf.put_u16(0); // reserved
    put_matrix(buf);
    buf.put_u32(track.width << 16);
    buf.put_u32(track.height << 16);
    end_box(buf, tkhd);

    if movie_delay > 0 {
        let edts = begin_box(buf, b"edts");
        let elst = begin_full_box(buf, b"elst", 1, 0);
        buf.put_u32(2);
        buf.put_u64(movie_delay);
        buf.put_i64(-1); // empty edit
        buf.put_u32(0x0001_0000);
        buf.put_u64(movie_duration);
        buf.put_i64(0);
        buf.put_u32(0x0001_0000);
        end_box(buf, elst);
        end_box(buf, edts);
    }

    let mdia = begin_box(buf, b"mdia");
    let mdhd = begin_full_box(buf, b"mdhd", 1, 0);
    buf.put_u64(0); // creation time
    buf.put_u64(0); // modification time
    buf.put_u32(track.timescale);
    buf.put_u64(media_duration);
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0);
    end_box(buf, mdhd);

    let handler = track.handler.to_bytes();
    let name = match track.handler {
        HandlerType::Video => "VideoHandler",
        HandlerType::Audio => "SoundHandler",
        _ => "",
    };
    put_hdlr(buf, handler, name);

    let minf = begin_box(buf, b"minf");
    put_media_header(buf, handler);
    put_dinf(buf);

    let stbl = begin_box(buf, b"stbl");
    let stsd = begin_full_box(buf, b"stsd", 0, 0);
    buf.put_u32(1); // entry count
    buf.put_slice(&track.sample_entry);
    end_box(buf, stsd);
    tables(buf);
    end_box(buf, stbl);

    end_box(buf, minf);
    end_box(buf, mdia);
    end_box(buf, trak);
}
