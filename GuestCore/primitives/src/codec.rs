//! Wire encoding helpers for messages and transactions.
//!
//! Lengths and counts use the compact-u16 encoding: 7 bits per byte,
//! least-significant group first, high bit set on every byte but the last,
//! at most 3 bytes. Fixed-width integers are little-endian. Decoding is
//! strict: truncated input, overlong or non-canonical compact lengths are
//! errors.

use alloc::vec::Vec;

use crate::error::{PrimitiveError, PrimitiveResult};

/// Largest value representable by a compact-u16.
pub const MAX_COMPACT_U16: usize = u16::MAX as usize;

/// Append the compact-u16 encoding of `value`.
pub fn write_compact_u16(buf: &mut Vec<u8>, value: u16) {
    let mut rem = value;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            buf.push(byte);
            break;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

/// Append a compact length prefix for a collection of `len` items.
pub fn write_len(buf: &mut Vec<u8>, len: usize) -> PrimitiveResult<()> {
    let value = u16::try_from(len).map_err(|_| {
        PrimitiveError::Deserialization(alloc::format!("length {} exceeds u16", len))
    })?;
    write_compact_u16(buf, value);
    Ok(())
}

/// A cursor for reading bytes during decoding.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_bytes(&mut self, n: usize) -> PrimitiveResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(PrimitiveError::Deserialization(
                "unexpected end of data".into(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> PrimitiveResult<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_array<const N: usize>(&mut self) -> PrimitiveResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_compact_u16(&mut self) -> PrimitiveResult<u16> {
        let mut value: u32 = 0;
        for i in 0..3 {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u32) << (i * 7);
            if byte & 0x80 == 0 {
                if i > 0 && byte == 0 {
                    return Err(PrimitiveError::Deserialization(
                        "non-canonical compact-u16".into(),
                    ));
                }
                return u16::try_from(value).map_err(|_| {
                    PrimitiveError::Deserialization("compact-u16 overflow".into())
                });
            }
        }
        Err(PrimitiveError::Deserialization(
            "compact-u16 longer than 3 bytes".into(),
        ))
    }

    /// Read a compact length prefix.
    pub fn read_len(&mut self) -> PrimitiveResult<usize> {
        Ok(self.read_compact_u16()? as usize)
    }

    /// Fail unless all input was consumed.
    pub fn finish(self) -> PrimitiveResult<()> {
        if self.remaining() != 0 {
            return Err(PrimitiveError::Deserialization(alloc::format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}
