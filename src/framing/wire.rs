//! Length-prefixed string/byte-vector cursor helpers (§6): strings are
//! u16 LE length + UTF-8 bytes, byte vectors are u32 LE length + bytes.
//! Ported from `original_source/server/src/frame.cpp`'s little-endian
//! read/write helpers, translated from raw pointer arithmetic to a
//! safe cursor over a byte slice.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of input")]
    Eof,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("length {0} exceeds remaining input")]
    LengthOverrun(u64),
}

pub type Result<T> = std::result::Result<T, WireError>;

/// A read-only cursor over a byte slice, advancing as fields are read.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError::Eof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    /// u16 LE length + UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16_le()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    /// u32 LE length + raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32_le()? as u64;
        if len > self.remaining() as u64 {
            return Err(WireError::LengthOverrun(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// A fixed-size array, for keys/hashes/nonces.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

/// Growable byte buffer with the inverse write helpers.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_u16_le(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.write_u32_le(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    pub fn write_raw(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let mut w = Writer::new();
        w.write_string("alice");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "alice");
    }

    #[test]
    fn bytes_roundtrip() {
        let mut w = Writer::new();
        w.write_bytes(&[1, 2, 3, 4]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_bytes().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn mixed_fields_roundtrip() {
        let mut w = Writer::new();
        w.write_u64_le(42);
        w.write_string("bob");
        w.write_bytes(b"payload");
        w.write_u8(7);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u64_le().unwrap(), 42);
        assert_eq!(r.read_string().unwrap(), "bob");
        assert_eq!(r.read_bytes().unwrap(), b"payload".to_vec());
        assert_eq!(r.read_u8().unwrap(), 7);
    }

    #[test]
    fn truncated_input_is_eof() {
        let mut r = Reader::new(&[0u8, 1]);
        assert_eq!(r.read_u32_le(), Err(WireError::Eof));
    }

    #[test]
    fn length_overrun_rejected_before_allocating() {
        let mut buf = vec![];
        buf.extend_from_slice(&(0xFFFF_FFFFu32).to_le_bytes());
        let mut r = Reader::new(&buf);
        assert!(matches!(r.read_bytes(), Err(WireError::LengthOverrun(_))));
    }
}
