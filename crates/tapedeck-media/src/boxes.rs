//! Low-level ISO-BMFF box helpers.
//!
//! Writers reserve a 4-byte size field, emit the payload and patch the size
//! once the box is complete. Readers walk a byte slice box by box and pull
//! big-endian fields through [`ByteReader`].

use crate::mp4::AtomType;
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Start a box and return its offset for [`end_box`].
pub(crate) fn begin_box(buf: &mut BytesMut, kind: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder
    buf.put_slice(kind);
    start
}

/// Start a full box (version + 24-bit flags).
pub(crate) fn begin_full_box(buf: &mut BytesMut, kind: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = begin_box(buf, kind);
    buf.put_u32((u32::from(version) << 24) | (flags & 0x00FF_FFFF));
    start
}

/// Patch the size of the box started at `start`.
pub(crate) fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Write a box header for a payload of `payload_size` bytes, switching to the
/// 64-bit form when needed. Used for `mdat`, whose payload is streamed separately.
pub(crate) fn put_box_header(buf: &mut BytesMut, kind: &[u8; 4], payload_size: u64) {
    if payload_size + 8 > u64::from(u32::MAX) {
        buf.put_u32(1);
        buf.put_slice(kind);
        buf.put_u64(payload_size + 16);
    } else {
        buf.put_u32((payload_size + 8) as u32);
        buf.put_slice(kind);
    }
}

/// Identity transformation matrix shared by `mvhd` and `tkhd`.
pub(crate) fn put_matrix(buf: &mut BytesMut) {
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(value);
    }
}

/// Write `dinf` with a single self-contained `url ` reference.
pub(crate) fn put_dinf(buf: &mut BytesMut) {
    let dinf = begin_box(buf, b"dinf");
    let dref = begin_full_box(buf, b"dref", 0, 0);
    buf.put_u32(1); // entry count
    let url = begin_full_box(buf, b"url ", 0, 1);
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);
}

/// Write `hdlr` for the given handler code.
pub(crate) fn put_hdlr(buf: &mut BytesMut, handler: [u8; 4], name: &str) {
    let start = begin_full_box(buf, b"hdlr", 0, 0);
    buf.put_u32(0); // pre_defined
    buf.put_slice(&handler);
    buf.put_slice(&[0; 12]); // reserved
    buf.put_slice(name.as_bytes());
    buf.put_u8(0);
    end_box(buf, start);
}

/// Write the media header matching the handler (`vmhd`, `smhd` or `nmhd`).
pub(crate) fn put_media_header(buf: &mut BytesMut, handler: [u8; 4]) {
    match &handler {
        b"vide" => {
            let start = begin_full_box(buf, b"vmhd", 0, 1);
            buf.put_u16(0); // graphics mode
            buf.put_slice(&[0; 6]); // opcolor
            end_box(buf, start);
        }
        b"soun" => {
            let start = begin_full_box(buf, b"smhd", 0, 0);
            buf.put_u16(0); // balance
            buf.put_u16(0);
            end_box(buf, start);
        }
        _ => {
            let start = begin_full_box(buf, b"nmhd", 0, 0);
            end_box(buf, start);
        }
    }
}

/// A box found while walking a byte slice.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBox<'a> {
    pub kind: AtomType,
    pub payload: &'a [u8],
}

/// Iterator over the boxes contained in a byte slice.
///
/// A box whose declared size runs past the slice ends the iteration with an error.
pub(crate) struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BoxIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<RawBox<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos..];
        if rest.len() < 8 {
            return None;
        }

        let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as u64;
        let kind = AtomType::from_bytes([rest[4], rest[5], rest[6], rest[7]]);

        let (size, header) = match size {
            0 => (rest.len() as u64, 8),
            1 => {
                if rest.len() < 16 {
                    self.pos = self.data.len();
                    return Some(Err(Error::BufferUnderflow { need: 16, have: rest.len() }));
                }
                let mut ext = [0u8; 8];
                ext.copy_from_slice(&rest[8..16]);
                (u64::from_be_bytes(ext), 16)
            }
            n => (n, 8),
        };

        if size < header as u64 || size > rest.len() as u64 {
            self.pos = self.data.len();
            return Some(Err(Error::invalid_mp4(format!(
                "box {} size {} exceeds available {} bytes",
                kind,
                size,
                rest.len()
            ))));
        }

        let size = size as usize;
        self.pos += size;
        Some(Ok(RawBox {
            kind,
            payload: &rest[header..size],
        }))
    }
}

/// Find the first child box of the given type.
pub(crate) fn find_child(data: &[u8], kind: AtomType) -> Result<Option<&[u8]>> {
    for child in BoxIter::new(data) {
        let child = child?;
        if child.kind == kind {
            return Ok(Some(child.payload));
        }
    }
    Ok(None)
}

/// Big-endian cursor over a box payload.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::BufferUnderflow {
                need: n,
                have: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read the version byte and 24-bit flags of a full box.
    pub fn version_flags(&mut self) -> Result<(u8, u32)> {
        let raw = self.u32()?;
        Ok(((raw >> 24) as u8, raw & 0x00FF_FFFF))
    }
}
