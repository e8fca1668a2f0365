//! Bounds-checked little-endian cursor over an in-memory byte slice.
//!
//! Every decoder reads through a [`ByteCursor`]; any read past the end of
//! the slice is an [`Error::UnexpectedEof`], never a panic or a zero fill.

use byteorder::{ByteOrder, LittleEndian};

use crate::util::{Error, Result};

/// Owned read position over a borrowed byte slice.
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor positioned at the start of `data`.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying slice.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the underlying slice is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Unread tail of the slice.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Move to an absolute position (may equal the length).
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::UnexpectedEof { pos, needed: 0 });
        }
        self.pos = pos;
        Ok(())
    }

    /// Take the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(Error::UnexpectedEof { pos: self.pos, needed: len })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Skip `len` bytes.
    #[inline]
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Advance to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let aligned = align_up(self.pos, alignment);
        self.seek(aligned)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    #[inline]
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    #[inline]
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    #[inline]
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    #[inline]
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    /// Read a non-negative `i32` count or size field.
    pub fn read_len(&mut self) -> Result<usize> {
        let pos = self.pos;
        let value = self.read_i32()?;
        usize::try_from(value)
            .map_err(|_| Error::invalid(format!("negative length {} at position {}", value, pos)))
    }

    /// Read a null-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let rest = self.rest();
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::UnexpectedEof { pos: self.pos, needed: rest.len() + 1 })?;
        let s = std::str::from_utf8(&rest[..nul])?;
        self.pos += nul + 1;
        Ok(s)
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two or 1).
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
