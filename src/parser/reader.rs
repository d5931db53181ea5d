//! Bounded byte cursor over a Wasm binary.
//!
//! Every section is parsed through a [`Reader::sub_reader`] restricted to the
//! section's declared length, so no section reader can consume bytes that
//! belong to its neighbours. All reads report truncation and malformed LEB128
//! encodings as [`ParserError`]s rather than panicking.

use byteorder::{ByteOrder, LittleEndian};

use super::ParserError;

#[derive(Debug, PartialEq)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8, ParserError> {
        let byte = *self.bytes.get(self.pos).ok_or(ParserError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParserError> {
        let end = self.pos.checked_add(len).ok_or(ParserError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(ParserError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Fixed-width little-endian u32 (the version field of the header).
    pub fn read_u32(&mut self) -> Result<u32, ParserError> {
        let bytes = self.read_bytes(4)?;
        Ok(LittleEndian::read_u32(bytes))
    }

    pub fn read_var_u32(&mut self) -> Result<u32, ParserError> {
        Ok(self.read_var_unsigned(32)? as u32)
    }

    pub fn read_var_u64(&mut self) -> Result<u64, ParserError> {
        self.read_var_unsigned(64)
    }

    pub fn read_var_i32(&mut self) -> Result<i32, ParserError> {
        Ok(self.read_var_signed(32)? as i32)
    }

    pub fn read_var_i64(&mut self) -> Result<i64, ParserError> {
        self.read_var_signed(64)
    }

    /// Length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String, ParserError> {
        let len = self.read_var_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ParserError::InvalidUtf8)
    }

    /// Split off a cursor over the next `len` bytes, advancing past them.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>, ParserError> {
        Ok(Reader::new(self.read_bytes(len)?))
    }

    fn read_var_unsigned(&mut self, bits: u32) -> Result<u64, ParserError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift + 7 >= bits {
                // Last byte the width permits: the continuation bit must be
                // clear and the payload bits beyond the width must be zero.
                let allowed = bits - shift;
                if byte & 0x80 != 0 || (byte as u64) >> allowed != 0 {
                    return Err(ParserError::MalformedLeb128);
                }
                return Ok(result | ((byte as u64) << shift));
            }
            result |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn read_var_signed(&mut self, bits: u32) -> Result<i64, ParserError> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            let payload = (byte & 0x7f) as i64;
            if shift + 7 >= bits {
                // Last byte the width permits: the continuation bit must be
                // clear and the unused payload bits must replicate the sign.
                if byte & 0x80 != 0 {
                    return Err(ParserError::MalformedLeb128);
                }
                let used = bits - shift;
                let sign = (payload >> (used - 1)) & 1;
                let expected = if sign == 1 { 0x7f >> used } else { 0 };
                if payload >> used != expected {
                    return Err(ParserError::MalformedLeb128);
                }
                result |= payload << shift;
                if sign == 1 && bits < 64 {
                    result |= -1i64 << bits;
                }
                return Ok(result);
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                shift += 7;
                if byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
            shift += 7;
        }
    }
}
