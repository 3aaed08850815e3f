use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{QueryError, Result};

/// How the bytes of a string field are turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8, with invalid sequences replaced.
    Utf8,
    /// Single-byte text; bytes above 0x7F map to their Latin-1 code points.
    Ascii,
}

impl Encoding {
    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Ascii => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Sequential reader over a borrowed byte buffer.
///
/// Every read advances the position by exactly the width it consumed.
/// A read wider than what is left fails with [QueryError::BufferUnderrun]
/// and leaves the position where it was.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of unread bytes.
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Borrow the next `n` bytes and step over them.
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining_len();
        if n > remaining {
            return Err(QueryError::BufferUnderrun { needed: n, remaining });
        }
        let bytes = &self.data[self.position..self.position + n];
        self.position += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32_be(&mut self) -> Result<i32> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// A 64-bit value sent as two little-endian 32-bit halves, low half first.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        let halves = self.take(8)?;
        let low = LittleEndian::read_u32(&halves[..4]) as u64;
        let high = LittleEndian::read_u32(&halves[4..]) as u64;
        Ok((high << 32) | low)
    }

    /// Read up to the next zero byte (or the end of the buffer) and step over
    /// the terminator.
    ///
    /// Fails only when no bytes are left at all.
    pub fn read_cstring(&mut self, encoding: Encoding) -> Result<String> {
        if !self.has_remaining() {
            return Err(QueryError::BufferUnderrun { needed: 1, remaining: 0 });
        }
        let rest = &self.data[self.position..];
        let (text, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.position += consumed;
        Ok(encoding.decode(text))
    }

    /// Read `length` bytes as text, clamped at the end of the buffer.
    pub fn read_fixed_string(&mut self, length: usize, encoding: Encoding) -> Result<String> {
        let length = length.min(self.remaining_len());
        let bytes = self.take(length)?;
        Ok(encoding.decode(bytes))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// The unread tail, without moving the position.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn set_position(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(QueryError::BufferUnderrun {
                needed: offset,
                remaining: self.data.len(),
            });
        }
        self.position = offset;
        Ok(())
    }
}

/// Builds request packets. Pure encoding, so there is no read position here.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_u16_le(&mut self, value: u16) -> &mut Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.put_bytes(&bytes)
    }

    pub fn put_u16_be(&mut self, value: u16) -> &mut Self {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.put_bytes(&bytes)
    }

    pub fn put_i32_le(&mut self, value: i32) -> &mut Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_i32(&mut bytes, value);
        self.put_bytes(&bytes)
    }

    pub fn put_i32_be(&mut self, value: i32) -> &mut Self {
        let mut bytes = [0u8; 4];
        BigEndian::write_i32(&mut bytes, value);
        self.put_bytes(&bytes)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Writes `text` followed by a zero byte.
    pub fn put_cstring(&mut self, text: &str) -> &mut Self {
        self.put_bytes(text.as_bytes()).put_u8(0)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
