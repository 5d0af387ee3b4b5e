//! Variable-length integer encoding.
//!
//! Unsigned values use 7 data bits per byte, least significant group first, with the high bit
//! of each byte flagging a continuation. Signed values are first mapped through zigzag encoding
//! so that small negative numbers stay short.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, ErrorKind::InvalidData, Read, Write};

/// Map a signed value onto an unsigned one: 0, -1, 1, -2, 2... become 0, 1, 2, 3, 4...
#[inline]
pub fn zigzag_encode(i: i64) -> u64 {
    ((i << 1) ^ (i >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Number of bytes `write_vlong` will use for a value.
pub fn vlong_len(mut n: u64) -> usize {
    let mut len = 1;
    while n >= 0x80 {
        n >>= 7;
        len += 1;
    }
    len
}

pub trait WriteVarExt: Write {
    fn write_vint(&mut self, n: u32) -> io::Result<()> {
        self.write_vlong(n as u64)
    }

    fn write_vlong(&mut self, mut n: u64) -> io::Result<()> {
        while n >= 0x80 {
            self.write_u8((n as u8 & 0x7F) | 0x80)?;
            n >>= 7;
        }
        self.write_u8(n as u8)
    }

    fn write_zint(&mut self, i: i32) -> io::Result<()> {
        self.write_vlong(zigzag_encode(i as i64))
    }

    fn write_zlong(&mut self, i: i64) -> io::Result<()> {
        self.write_vlong(zigzag_encode(i))
    }
}

impl<W: Write + ?Sized> WriteVarExt for W {}

pub trait ReadVarExt: Read {
    fn read_vint(&mut self) -> io::Result<u32> {
        let mut n = 0u32;
        for shift in (0..35).step_by(7) {
            let b = self.read_u8()?;
            if shift == 28 && b > 0x0F {
                return Err(io::Error::new(InvalidData, "VarInt larger than a u32"));
            }
            n |= ((b & 0x7F) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(n);
            }
        }
        unreachable!()
    }

    fn read_vlong(&mut self) -> io::Result<u64> {
        let mut n = 0u64;
        for shift in (0..70).step_by(7) {
            let b = self.read_u8()?;
            if shift == 63 && b > 0x01 {
                return Err(io::Error::new(InvalidData, "VarLong larger than a u64"));
            }
            n |= ((b & 0x7F) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(n);
            }
        }
        unreachable!()
    }

    fn read_zint(&mut self) -> io::Result<i32> {
        let n = self.read_vlong()?;
        i32::try_from(zigzag_decode(n))
            .map_err(|_| io::Error::new(InvalidData, "ZInt out of range for an i32"))
    }

    fn read_zlong(&mut self) -> io::Result<i64> {
        Ok(zigzag_decode(self.read_vlong()?))
    }
}

impl<R: Read + ?Sized> ReadVarExt for R {}
