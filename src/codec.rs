//! Header and footer framing shared by every stored fields file.
//!
//! Header: magic (u32), codec name (vint length + UTF-8 bytes), version (u32).
//! Footer: footer magic (u32), checksum algorithm (u32, always 0), CRC32 of all preceding bytes
//! widened to a u64. Fixed-width words are big-endian.

use crate::error::{Error, Result};
use crate::store::{IndexInput, IndexOutput};
use crate::varint::{vlong_len, ReadVarExt, WriteVarExt};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const CODEC_MAGIC: u32 = 0x3FD7_6C17;
pub const FOOTER_MAGIC: u32 = !CODEC_MAGIC;
pub const FOOTER_LENGTH: u64 = 16;
const ALGORITHM_CRC32: u32 = 0;
/// Codec names are short identifiers; anything longer is a corrupt header.
const MAX_CODEC_NAME: usize = 127;

pub fn write_header<W: Write + ?Sized>(out: &mut W, codec: &str, version: u32) -> io::Result<()> {
    assert!(
        codec.len() <= MAX_CODEC_NAME && codec.is_ascii(),
        "invalid codec name: {:?}",
        codec
    );
    out.write_u32::<BigEndian>(CODEC_MAGIC)?;
    out.write_vint(codec.len() as u32)?;
    out.write_all(codec.as_bytes())?;
    out.write_u32::<BigEndian>(version)
}

/// Byte length of a header written by [`write_header`].
pub fn header_length(codec: &str) -> u64 {
    (4 + vlong_len(codec.len() as u64) + codec.len() + 4) as u64
}

/// Verify the header, returning the file's version.
pub fn check_header<R: Read + ?Sized>(
    input: &mut R,
    codec: &str,
    min_version: u32,
    max_version: u32,
    resource: &str,
) -> Result<u32> {
    let magic = input.read_u32::<BigEndian>()?;
    if magic != CODEC_MAGIC {
        return Err(Error::bad_header(
            resource,
            format!(
                "codec header mismatch: actual header={:#010x} vs expected header={:#010x}",
                magic, CODEC_MAGIC
            ),
        ));
    }

    let name_len = input.read_vint()? as usize;
    if name_len > MAX_CODEC_NAME {
        return Err(Error::bad_header(
            resource,
            format!("codec name length {} is too long", name_len),
        ));
    }
    let mut name = vec![0u8; name_len];
    input.read_exact(&mut name)?;
    if name != codec.as_bytes() {
        return Err(Error::bad_header(
            resource,
            format!(
                "codec mismatch: actual codec={:?} vs expected codec={:?}",
                String::from_utf8_lossy(&name),
                codec
            ),
        ));
    }

    let version = input.read_u32::<BigEndian>()?;
    if version < min_version || version > max_version {
        return Err(Error::UnsupportedVersion {
            resource: resource.to_string(),
            version,
            min: min_version,
            max: max_version,
        });
    }
    Ok(version)
}

/// Write the footer, which must be the last thing written to the output.
pub fn write_footer(out: &mut dyn IndexOutput) -> io::Result<()> {
    out.write_u32::<BigEndian>(FOOTER_MAGIC)?;
    out.write_u32::<BigEndian>(ALGORITHM_CRC32)?;
    let checksum = out.checksum();
    out.write_u64::<BigEndian>(checksum as u64)
}

fn read_footer<R: Read + ?Sized>(input: &mut R, resource: &str) -> Result<u64> {
    let magic = input.read_u32::<BigEndian>()?;
    if magic != FOOTER_MAGIC {
        return Err(Error::bad_header(
            resource,
            format!(
                "codec footer mismatch: actual footer={:#010x} vs expected footer={:#010x}",
                magic, FOOTER_MAGIC
            ),
        ));
    }
    let algorithm = input.read_u32::<BigEndian>()?;
    if algorithm != ALGORITHM_CRC32 {
        return Err(Error::corrupt(
            resource,
            format!("unknown checksum algorithm={}", algorithm),
        ));
    }
    let checksum = input.read_u64::<BigEndian>()?;
    if checksum >> 32 != 0 {
        return Err(Error::corrupt(
            resource,
            format!("illegal checksum: {:#018x}", checksum),
        ));
    }
    Ok(checksum)
}

/// Check the footer of a file held in memory and verify its checksum. Returns the content that
/// precedes the footer.
pub fn check_footer<'a>(bytes: &'a [u8], resource: &str) -> Result<&'a [u8]> {
    if (bytes.len() as u64) < FOOTER_LENGTH {
        return Err(Error::corrupt(
            resource,
            format!("file is too short ({} bytes) to contain a footer", bytes.len()),
        ));
    }
    let footer_start = bytes.len() - FOOTER_LENGTH as usize;
    let expected = read_footer(&mut &bytes[footer_start..], resource)?;
    let actual = crc32fast::hash(&bytes[..bytes.len() - 8]) as u64;
    if expected != actual {
        return Err(Error::ChecksumMismatch {
            resource: resource.to_string(),
            expected,
            actual,
        });
    }
    Ok(&bytes[..footer_start])
}

/// Validate the footer's framing and return the stored checksum, without reading the whole file.
pub fn retrieve_checksum(input: &mut dyn IndexInput) -> Result<u64> {
    let resource = input.name().to_string();
    let len = input.len();
    if len < FOOTER_LENGTH {
        return Err(Error::corrupt(
            resource,
            format!("file is too short ({} bytes) to contain a footer", len),
        ));
    }
    input.seek(len - FOOTER_LENGTH)?;
    read_footer(input, &resource)
}

/// Read the entire file and verify the checksum stored in its footer.
pub fn checksum_entire_file(input: &mut dyn IndexInput) -> Result<u64> {
    let expected = retrieve_checksum(input)?;
    input.seek(0)?;
    let mut remaining = input.len() - 8;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 16 * 1024];
    while remaining > 0 {
        let n = (remaining as usize).min(buf.len());
        input.read_exact(&mut buf[..n])?;
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    let actual = hasher.finalize() as u64;
    if expected != actual {
        return Err(Error::ChecksumMismatch {
            resource: input.name().to_string(),
            expected,
            actual,
        });
    }
    Ok(actual)
}
