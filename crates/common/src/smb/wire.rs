// Little-endian encoding helpers shared by the SMB2, NTLM and DCE/RPC codecs

use crate::error::{Error, Result};

/// Growable little-endian buffer
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + n, 0);
        self
    }

    /// Pad with zeros up to a multiple of `n`
    pub fn align(&mut self, n: usize) -> &mut Self {
        let rem = self.buf.len() % n;
        if rem != 0 {
            self.zeros(n - rem);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked little-endian reader
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| truncated(self.pos, n, self.buf.len()))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn align(&mut self, n: usize) -> Result<()> {
        let rem = self.pos % n;
        if rem != 0 {
            self.skip(n - rem)?;
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }
}

/// Slice `len` bytes at `offset`, as described by an offset/length field pair
pub fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .map(|end| &buf[offset..end])
        .ok_or_else(|| truncated(offset, len, buf.len()))
}

fn truncated(pos: usize, want: usize, have: usize) -> Error {
    Error::Protocol(format!(
        "Truncated message: need {want} byte(s) at offset {pos}, have {have}"
    ))
}

/// UTF-16LE encoding without terminator
pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Decode UTF-16LE, dropping a trailing NUL
pub fn from_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let trimmed = match units.iter().position(|u| *u == 0) {
        Some(end) => &units[..end],
        None => &units[..],
    };
    String::from_utf16_lossy(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_bounds() {
        let data = [1u8, 0, 2, 0, 0, 0];
        let mut r = Reader::new(&data);
        assert_eq!(r.u16().unwrap(), 1);
        assert_eq!(r.u32().unwrap(), 2);
        assert!(matches!(r.u8(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_writer_align() {
        let mut w = Writer::new();
        w.u8(1).align(4).u16(0xABCD);
        assert_eq!(w.into_inner(), vec![1, 0, 0, 0, 0xCD, 0xAB]);
    }

    #[test]
    fn test_utf16_round_trip() {
        let encoded = utf16le("Daten");
        assert_eq!(encoded.len(), 10);
        let mut with_nul = encoded.clone();
        with_nul.extend_from_slice(&[0, 0]);
        assert_eq!(from_utf16le(&with_nul), "Daten");
    }

    #[test]
    fn test_slice_at_rejects_overflow() {
        let data = [0u8; 8];
        assert!(slice_at(&data, 4, 4).is_ok());
        assert!(slice_at(&data, 6, 4).is_err());
        assert!(slice_at(&data, usize::MAX, 2).is_err());
    }
}
