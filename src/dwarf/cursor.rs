//! A forward-only byte cursor over a DWARF section. Grounded in the original `dwarf.cpp`'s anonymous `cursor`
//! class: fixed-width reads, a NUL-terminated string reader, and
//! ULEB128/SLEB128 variable-length integer decoding.

use crate::error::{Error, Result};

pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Cursor { data, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::format("DWARF cursor read past end of section"));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn s8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn s16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn s32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn s64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    /// Reads a `size`-byte little-endian address; `size` is the
    /// compile unit's address size (always 8 in this crate — 32-bit
    /// targets are out of scope).
    pub fn address(&mut self, size: u8) -> Result<u64> {
        match size {
            8 => self.u64(),
            4 => Ok(self.u32()? as u64),
            _ => Err(Error::format("unsupported DWARF address size")),
        }
    }

    pub fn string(&mut self) -> Result<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            return Err(Error::format("unterminated DWARF string"));
        }
        let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        self.pos += 1; // consume the NUL
        Ok(s)
    }

    pub fn uleb128(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    pub fn sleb128(&mut self) -> Result<i64> {
        let mut result: i64 = 0;
        let mut shift = 0;
        let mut byte;
        loop {
            byte = self.u8()?;
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if shift < 64 && byte & 0x40 != 0 {
            result |= -1i64 << shift;
        }
        Ok(result)
    }

    pub fn block(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn uleb128_multi_byte() {
        // 624485 encodes to 0xE5 0x8E 0x26 per the DWARF spec example.
        let bytes = [0xE5, 0x8E, 0x26];
        let mut c = Cursor::new(&bytes);
        assert_eq!(c.uleb128().unwrap(), 624485);
    }

    #[test]
    fn sleb128_negative() {
        // -624485 encodes to 0x9B 0xF1 0x59 per the DWARF spec example.
        let bytes = [0x9B, 0xF1, 0x59];
        let mut c = Cursor::new(&bytes);
        assert_eq!(c.sleb128().unwrap(), -624485);
    }

    #[test]
    fn string_stops_at_nul() {
        let bytes = b"hello\0world";
        let mut c = Cursor::new(bytes);
        assert_eq!(c.string().unwrap(), "hello");
        assert_eq!(c.pos(), 6);
    }
}
