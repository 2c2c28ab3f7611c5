//! MP4 file reader with atom parsing.

use super::{Atom, AtomType, HandlerType, Mp4File, SampleTableBuilder, TrackDefaults, TrackInfo};
use crate::boxes::{find_child, BoxIter, ByteReader};
use crate::{Error, Result};
use bytes::Bytes;
use std::io::{Read, Seek, SeekFrom};

/// Maximum allowed atom data size (64 MB) to prevent OOM on malformed files.
const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

/// MP4 file reader.
pub struct Mp4Reader<R> {
    reader: R,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Reader<R> {
    /// Create a new MP4 reader.
    pub fn new(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, file_size })
    }

    /// Total size of the underlying file.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Parse the top-level layout and the movie header.
    pub fn parse(&mut self) -> Result<Mp4File> {
        let atoms = self.read_atoms(0, self.file_size)?;

        let moov = atoms
            .iter()
            .find(|a| a.atom_type == AtomType::MOOV)
            .ok_or(Error::MissingAtom("moov"))?;
        let data = self.read_atom_data(moov)?;
        let mut mp4 = parse_moov(&data)?;

        let mdat = atoms.iter().find(|a| a.atom_type == AtomType::MDAT);
        mp4.has_faststart = mdat.map_or(true, |m| moov.offset() < m.offset());
        mp4.fragment_count = atoms.iter().filter(|a| a.atom_type == AtomType::MOOF).count();

        Ok(mp4)
    }

    /// Read the atom header at `pos`.
    ///
    /// Returns `None` at end of file and for an atom whose declared size runs
    /// past the end of the file, which happens while a file is still being written.
    pub fn read_atom_at(&mut self, pos: u64) -> Result<Option<Atom>> {
        if pos + 8 > self.file_size {
            return Ok(None);
        }
        self.reader.seek(SeekFrom::Start(pos))?;

        let mut header = [0u8; 8];
        self.reader.read_exact(&mut header)?;

        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);

        let (actual_size, header_size) = if size == 1 {
            if pos + 16 > self.file_size {
                return Ok(None);
            }
            let mut ext = [0u8; 8];
            self.reader.read_exact(&mut ext)?;
            (u64::from_be_bytes(ext), 16u8)
        } else if size == 0 {
            // Atom extends to end of file
            (self.file_size - pos, 8u8)
        } else {
            (size, 8u8)
        };

        if actual_size < header_size as u64 {
            return Err(Error::invalid_mp4(format!(
                "atom {} at {} has size {}",
                atom_type, pos, actual_size
            )));
        }
        if pos + actual_size > self.file_size {
            return Ok(None);
        }

        Ok(Some(Atom {
            atom_type,
            size: actual_size,
            data_offset: pos + header_size as u64,
            header_size,
        }))
    }

    /// Read complete atoms between `start` and `end`.
    pub fn read_atoms(&mut self, start: u64, end: u64) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        let mut pos = start;

        while pos < end {
            match self.read_atom_at(pos)? {
                Some(atom) => {
                    pos = atom.end();
                    atoms.push(atom);
                }
                None => break,
            }
        }

        Ok(atoms)
    }

    /// Read and validate atom data, rejecting oversized atoms.
    pub fn read_atom_data(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        let size = atom.data_size();
        if size > MAX_ATOM_DATA_SIZE {
            return Err(Error::InvalidMp4(format!(
                "Atom {} data size {} exceeds maximum {}",
                atom.atom_type, size, MAX_ATOM_DATA_SIZE
            )));
        }
        self.reader.seek(SeekFrom::Start(atom.data_offset))?;
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// Read `len` bytes at `offset`.
    pub fn read_at(&mut self, offset: u64, len: u32) -> Result<Bytes> {
        if offset + len as u64 > self.file_size {
            return Err(Error::invalid_mp4(format!(
                "sample at {}+{} past end of file ({})",
                offset, len, self.file_size
            )));
        }
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len as usize];
        self.reader.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }
}

/// Parse the payload of a `moov` atom.
pub fn parse_moov(data: &[u8]) -> Result<Mp4File> {
    let mut mp4 = Mp4File::default();

    for child in BoxIter::new(data) {
        let child = child?;
        match child.kind {
            AtomType::MVHD => parse_mvhd(child.payload, &mut mp4)?,
            AtomType::TRAK => mp4.tracks.push(parse_trak(child.payload)?),
            AtomType::MVEX => {
                for trex in BoxIter::new(child.payload) {
                    let trex = trex?;
                    if trex.kind == AtomType::TREX {
                        mp4.trex.push(parse_trex(trex.payload)?);
                    }
                }
            }
            _ => {}
        }
    }

    if mp4.tracks.is_empty() {
        return Err(Error::MissingAtom("trak"));
    }

    Ok(mp4)
}

fn parse_mvhd(data: &[u8], mp4: &mut Mp4File) -> Result<()> {
    let mut r = ByteReader::new(data);
    let (version, _) = r.version_flags()?;

    if version == 1 {
        r.skip(16)?;
        mp4.timescale = r.u32()?;
        mp4.duration = r.u64()?;
    } else {
        r.skip(8)?;
        mp4.timescale = r.u32()?;
        mp4.duration = r.u32()? as u64;
    }

    Ok(())
}

fn parse_trak(data: &[u8]) -> Result<TrackInfo> {
    let tkhd = find_child(data, AtomType::TKHD)?.ok_or(Error::MissingAtom("tkhd"))?;
    let mdia = find_child(data, AtomType::MDIA)?.ok_or(Error::MissingAtom("mdia"))?;

    let mut track = TrackInfo::new(0);
    parse_tkhd(tkhd, &mut track)?;
    parse_mdia(mdia, &mut track)?;
    Ok(track)
}

fn parse_tkhd(data: &[u8], track: &mut TrackInfo) -> Result<()> {
    let mut r = ByteReader::new(data);
    let (version, _) = r.version_flags()?;

    if version == 1 {
        r.skip(16)?;
        track.track_id = r.u32()?;
        r.skip(4 + 8)?;
    } else {
        r.skip(8)?;
        track.track_id = r.u32()?;
        r.skip(4 + 4)?;
    }
    // reserved, layer, alternate group, volume, reserved, matrix
    r.skip(8 + 2 + 2 + 2 + 2 + 36)?;
    track.width = r.u32()? >> 16;
    track.height = r.u32()? >> 16;

    Ok(())
}

fn parse_mdia(data: &[u8], track: &mut TrackInfo) -> Result<()> {
    let mdhd = find_child(data, AtomType::MDHD)?.ok_or(Error::MissingAtom("mdhd"))?;
    let mut r = ByteReader::new(mdhd);
    let (version, _) = r.version_flags()?;
    if version == 1 {
        r.skip(16)?;
        track.timescale = r.u32()?;
        track.duration = r.u64()?;
    } else {
        r.skip(8)?;
        track.timescale = r.u32()?;
        track.duration = r.u32()? as u64;
    }
    if track.timescale == 0 {
        return Err(Error::invalid_mp4(format!(
            "track {} has a zero timescale",
            track.track_id
        )));
    }

    let hdlr = find_child(data, AtomType::HDLR)?.ok_or(Error::MissingAtom("hdlr"))?;
    let mut r = ByteReader::new(hdlr);
    r.skip(8)?;
    let raw = r.take(4)?;
    track.handler_type = HandlerType::from_bytes([raw[0], raw[1], raw[2], raw[3]]);

    let minf = find_child(data, AtomType::MINF)?.ok_or(Error::MissingAtom("minf"))?;
    let stbl = find_child(minf, AtomType::STBL)?.ok_or(Error::MissingAtom("stbl"))?;
    parse_stbl(stbl, track)
}

fn parse_stbl(data: &[u8], track: &mut TrackInfo) -> Result<()> {
    let mut builder = SampleTableBuilder::new();
    let mut has_stsd = false;

    for child in BoxIter::new(data) {
        let child = child?;
        let payload = child.payload;
        match child.kind {
            AtomType::STSD => {
                track.sample_entry = parse_stsd(payload)?;
                has_stsd = true;
            }
            AtomType::STTS => builder.set_stts(parse_pairs(payload, |r| Ok((r.u32()?, r.u32()?)))?),
            AtomType::CTTS => builder.set_ctts(parse_pairs(payload, |r| Ok((r.u32()?, r.i32()?)))?),
            AtomType::STSS => builder.set_sync_samples(parse_pairs(payload, |r| r.u32())?),
            AtomType::STSC => {
                builder.set_stsc(parse_pairs(payload, |r| Ok((r.u32()?, r.u32()?, r.u32()?)))?)
            }
            AtomType::STCO => {
                builder.set_chunk_offsets(parse_pairs(payload, |r| Ok(r.u32()? as u64))?)
            }
            AtomType::CO64 => builder.set_chunk_offsets(parse_pairs(payload, |r| r.u64())?),
            AtomType::STSZ => {
                let mut r = ByteReader::new(payload);
                r.skip(4)?;
                let uniform = r.u32()?;
                let count = r.u32()?;
                let mut sizes = Vec::new();
                if uniform == 0 {
                    sizes.reserve(count.min(1 << 20) as usize);
                    for _ in 0..count {
                        sizes.push(r.u32()?);
                    }
                }
                builder.set_stsz(uniform, count, sizes);
            }
            _ => {}
        }
    }

    if !has_stsd {
        return Err(Error::MissingAtom("stsd"));
    }
    track.sample_table = builder.build();
    Ok(())
}

/// Extract the first sample entry, header included.
fn parse_stsd(data: &[u8]) -> Result<Bytes> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    if r.u32()? == 0 {
        return Err(Error::invalid_mp4("stsd without entries"));
    }

    let entries = &data[8..];
    let mut size_reader = ByteReader::new(entries);
    let size = size_reader.u32()? as usize;
    if size < 8 || size > entries.len() {
        return Err(Error::invalid_mp4(format!("sample entry size {}", size)));
    }

    Ok(Bytes::copy_from_slice(&entries[..size]))
}

fn parse_trex(data: &[u8]) -> Result<TrackDefaults> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    Ok(TrackDefaults {
        track_id: r.u32()?,
        sample_description_index: r.u32()?,
        sample_duration: r.u32()?,
        sample_size: r.u32()?,
        sample_flags: r.u32()?,
    })
}

/// Parse a full box holding an entry count followed by fixed-size entries.
fn parse_pairs<T>(
    data: &[u8],
    mut entry: impl FnMut(&mut ByteReader<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut r = ByteReader::new(data);
    r.skip(4)?;
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count.min(1 << 20) as usize);
    for _ in 0..count {
        out.push(entry(&mut r)?);
    }
    Ok(out)
}
