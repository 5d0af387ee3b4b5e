//! Fixed bit-width packed integer arrays.
//!
//! Values are laid out most significant bit first and back to back, so `count` values of
//! `bits` bits take exactly `ceil(count * bits / 8)` bytes. There is no header: the value count
//! and bit width always come from the surrounding format.

use crate::error::{Error, Result};
use crate::varint::{ReadVarExt, WriteVarExt};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// First version of the packed layout.
pub const PACKED_VERSION_START: u32 = 0;
/// Byte-aligned layout, the only one written.
pub const PACKED_VERSION_BYTE_ALIGNED: u32 = 1;
pub const PACKED_VERSION_CURRENT: u32 = PACKED_VERSION_BYTE_ALIGNED;

/// Minimum bit width able to hold `max_value`. Never returns 0.
#[inline]
pub fn bits_required(max_value: u64) -> u32 {
    (64 - max_value.leading_zeros()).max(1)
}

/// Largest value that fits in `bits` bits.
#[inline]
pub fn max_value(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Number of bytes used to store `count` values of `bits` bits.
#[inline]
pub fn byte_count(count: usize, bits: u32) -> usize {
    ((count as u64 * bits as u64 + 7) / 8) as usize
}

pub(crate) fn check_version(version: u32, resource: &str) -> Result<()> {
    if !(PACKED_VERSION_START..=PACKED_VERSION_CURRENT).contains(&version) {
        return Err(Error::UnsupportedVersion {
            resource: resource.to_string(),
            version,
            min: PACKED_VERSION_START,
            max: PACKED_VERSION_CURRENT,
        });
    }
    Ok(())
}

/// Write-once streaming encoder. Exactly `count` values must be added before calling
/// [`finish`][PackedWriter::finish].
pub struct PackedWriter<'a, W: Write + ?Sized> {
    out: &'a mut W,
    bits: u32,
    count: usize,
    written: usize,
    acc: u128,
    acc_bits: u32,
}

impl<'a, W: Write + ?Sized> PackedWriter<'a, W> {
    pub fn new(out: &'a mut W, count: usize, bits: u32) -> Self {
        assert!((1..=64).contains(&bits), "invalid bits per value: {}", bits);
        Self {
            out,
            bits,
            count,
            written: 0,
            acc: 0,
            acc_bits: 0,
        }
    }

    pub fn add(&mut self, value: u64) -> io::Result<()> {
        assert!(self.written < self.count, "too many values added");
        assert!(
            value <= max_value(self.bits),
            "value {} doesn't fit in {} bits",
            value,
            self.bits
        );
        self.acc = (self.acc << self.bits) | value as u128;
        self.acc_bits += self.bits;
        while self.acc_bits >= 8 {
            self.acc_bits -= 8;
            self.out.write_u8((self.acc >> self.acc_bits) as u8)?;
        }
        self.acc &= (1u128 << self.acc_bits) - 1;
        self.written += 1;
        Ok(())
    }

    pub fn finish(self) -> io::Result<()> {
        assert_eq!(self.written, self.count, "not all values were added");
        if self.acc_bits > 0 {
            self.out.write_u8((self.acc << (8 - self.acc_bits)) as u8)?;
        }
        Ok(())
    }
}

/// Sequential decoder over a stream. Pulls bytes from the input only as needed, so after the
/// last value it has consumed exactly [`byte_count`] bytes.
pub struct PackedReaderIterator {
    bits: u32,
    remaining: usize,
    acc: u128,
    acc_bits: u32,
}

impl PackedReaderIterator {
    pub fn new(version: u32, count: usize, bits: u32) -> Self {
        debug_assert!(version <= PACKED_VERSION_CURRENT);
        assert!((1..=64).contains(&bits), "invalid bits per value: {}", bits);
        Self {
            bits,
            remaining: count,
            acc: 0,
            acc_bits: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn next<R: Read + ?Sized>(&mut self, input: &mut R) -> io::Result<u64> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "packed array exhausted",
            ));
        }
        while self.acc_bits < self.bits {
            self.acc = (self.acc << 8) | input.read_u8()? as u128;
            self.acc_bits += 8;
        }
        self.acc_bits -= self.bits;
        let value = (self.acc >> self.acc_bits) as u64 & max_value(self.bits);
        self.acc &= (1u128 << self.acc_bits) - 1;
        self.remaining -= 1;
        Ok(value)
    }
}

/// Random-access packed array, held fully in memory.
#[derive(Clone, Debug)]
pub struct PackedArray {
    data: Vec<u8>,
    bits: u32,
    len: usize,
}

impl PackedArray {
    /// Read `count` values of `bits` bits from the input.
    pub fn read<R: Read + ?Sized>(
        input: &mut R,
        version: u32,
        count: usize,
        bits: u32,
    ) -> io::Result<Self> {
        debug_assert!(version <= PACKED_VERSION_CURRENT);
        assert!((1..=64).contains(&bits), "invalid bits per value: {}", bits);
        let mut data = vec![0u8; byte_count(count, bits)];
        input.read_exact(&mut data)?;
        Ok(Self {
            data,
            bits,
            len: count,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits_per_value(&self) -> u32 {
        self.bits
    }

    pub fn get(&self, index: usize) -> u64 {
        assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        let start = index as u64 * self.bits as u64;
        let end = start + self.bits as u64;
        let first = (start / 8) as usize;
        let last = ((end - 1) / 8) as usize;
        let mut acc = 0u128;
        for &b in &self.data[first..=last] {
            acc = (acc << 8) | b as u128;
        }
        let shift = (last as u64 + 1) * 8 - end;
        (acc >> shift) as u64 & max_value(self.bits)
    }
}

/// Width value that flags an array whose elements are all equal.
const ALL_EQUAL: u32 = 0;

/// Write a non-empty array of small integers.
///
/// A single value is written as a plain vint. If every value is the same, a zero width is
/// written followed by that value. Otherwise the minimal bit width is written, then the packed
/// values.
pub fn write_ints<W: Write + ?Sized>(values: &[u32], out: &mut W) -> io::Result<()> {
    assert!(!values.is_empty());
    if values.len() == 1 {
        return out.write_vint(values[0]);
    }

    if values.iter().all(|&v| v == values[0]) {
        out.write_vint(ALL_EQUAL)?;
        return out.write_vint(values[0]);
    }

    let max = values.iter().fold(0u32, |acc, &v| acc | v);
    let bits = bits_required(max as u64);
    out.write_vint(bits)?;
    let mut w = PackedWriter::new(out, values.len(), bits);
    for &v in values {
        w.add(v as u64)?;
    }
    w.finish()
}

/// Read `count` integers written by [`write_ints`] into `dst`, replacing its contents.
pub fn read_ints<R: Read + ?Sized>(
    input: &mut R,
    version: u32,
    count: usize,
    dst: &mut Vec<u32>,
    resource: &str,
) -> Result<()> {
    assert!(count > 0);
    dst.clear();
    if count == 1 {
        dst.push(input.read_vint()?);
        return Ok(());
    }

    let bits = input.read_vint()?;
    if bits == ALL_EQUAL {
        let value = input.read_vint()?;
        dst.resize(count, value);
    } else if bits > 31 {
        return Err(Error::corrupt(resource, format!("bitsPerValue={}", bits)));
    } else {
        let mut it = PackedReaderIterator::new(version, count, bits);
        for _ in 0..count {
            dst.push(it.next(input)? as u32);
        }
    }
    Ok(())
}
