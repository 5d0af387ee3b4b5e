//! Block compression for chunk payloads.
//!
//! A compressed block is written as a frame: the raw length, the stored length, then the stored
//! bytes. Chunks hold one frame, or several when they were sliced, and [`Decompressor`] walks the
//! frames to produce only the requested byte range.

use crate::error::{Error, Result};
use crate::store::IndexInput;
use crate::varint::{ReadVarExt, WriteVarExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::{cell::RefCell, convert::TryFrom, fmt};

thread_local! {
    static ZSTD_CCTX: RefCell<zstd_safe::CCtx<'static>> = RefCell::new(zstd_safe::CCtx::create());
    static ZSTD_DCTX: RefCell<zstd_safe::DCtx<'static>> = RefCell::new(zstd_safe::DCtx::create());
}

#[derive(Debug, Clone)]
pub enum CompressionError {
    /// A frame's raw length is larger than any frame this format writes.
    ExceededSize { max: usize, actual: usize },
    ZstdInner(usize),
    Parsing(&'static str),
    /// The compression type byte in the file header is not recognized.
    UnknownType(u8),
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionError::ExceededSize { max, actual } => write!(
                f,
                "Frame claims {} raw bytes, larger than the max of {}",
                actual, max
            ),
            CompressionError::ZstdInner(v) => {
                // SAFETY: We assume the zstd library will always return a valid
                // static C string from this function, as it promises to do.
                let e_str = unsafe {
                    core::ffi::CStr::from_ptr(zstd_safe::zstd_sys::ZSTD_getErrorName(*v))
                };
                let e_str = e_str.to_str().unwrap_or("Undisplayable error code");
                write!(f, "zstd failure, code {} ({})", v, e_str)
            }
            CompressionError::Parsing(s) => f.write_str(s),
            CompressionError::UnknownType(t) => write!(f, "Unknown compression type {}", t),
        }
    }
}

impl std::error::Error for CompressionError {}

impl From<zstd_safe::ErrorCode> for CompressionError {
    fn from(value: zstd_safe::ErrorCode) -> Self {
        CompressionError::ZstdInner(value)
    }
}

/// How chunk payloads are compressed. Recorded as a single byte in the data file, so a reader
/// never needs to be told which mode a segment was written with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum CompressionMode {
    /// Store payloads as-is.
    None,
    /// Compress payloads with zstd at the given level.
    Zstd { level: i32 },
}

impl CompressionMode {
    /// Fast compression and decompression, modest ratio.
    pub fn fast() -> Self {
        CompressionMode::Zstd { level: 1 }
    }

    /// Slow compression, better ratio. Decompression stays fast.
    pub fn high_compression() -> Self {
        CompressionMode::Zstd { level: 19 }
    }

    pub(crate) fn compress_type(&self) -> CompressType {
        match self {
            CompressionMode::None => CompressType::None,
            CompressionMode::Zstd { .. } => CompressType::Zstd,
        }
    }
}

impl std::default::Default for CompressionMode {
    fn default() -> Self {
        Self::fast()
    }
}

/// The on-disk identifier of a compression algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CompressType {
    None,
    Zstd,
}

impl From<CompressType> for u8 {
    fn from(val: CompressType) -> u8 {
        match val {
            CompressType::None => 0,
            CompressType::Zstd => 1,
        }
    }
}

impl TryFrom<u8> for CompressType {
    type Error = u8;
    fn try_from(val: u8) -> Result<CompressType, u8> {
        match val {
            0 => Ok(CompressType::None),
            1 => Ok(CompressType::Zstd),
            _ => Err(val),
        }
    }
}

/// Writes frames. Owns a scratch buffer that is reused between blocks.
pub struct Compressor {
    mode: CompressionMode,
    scratch: Vec<u8>,
}

impl Compressor {
    pub fn new(mode: CompressionMode) -> Self {
        Self {
            mode,
            scratch: Vec::new(),
        }
    }

    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    /// Compress `src` as one frame and append it to `out`.
    pub fn compress<W: io::Write + ?Sized>(&mut self, src: &[u8], out: &mut W) -> io::Result<()> {
        out.write_vint(src.len() as u32)?;
        match self.mode {
            CompressionMode::None => {
                out.write_vint(src.len() as u32)?;
                out.write_all(src)
            }
            CompressionMode::Zstd { level } => {
                self.scratch.clear();
                zstd_compress(src, &mut self.scratch, level)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                out.write_vint(self.scratch.len() as u32)?;
                out.write_all(&self.scratch)
            }
        }
    }
}

/// Reads frames back. Each reader clone gets its own, since it holds scratch space.
pub struct Decompressor {
    kind: CompressType,
    max_frame_len: usize,
    compressed: Vec<u8>,
    decompressed: u64,
}

impl Decompressor {
    /// `max_frame_len` bounds the raw length any frame may claim.
    pub(crate) fn new(kind: CompressType, max_frame_len: usize) -> Self {
        Self {
            kind,
            max_frame_len,
            compressed: Vec::new(),
            decompressed: 0,
        }
    }

    /// Total raw bytes produced so far.
    pub fn decompressed_bytes(&self) -> u64 {
        self.decompressed
    }

    /// Fill `dst` with exactly `length` bytes, starting `offset` bytes into the raw content of
    /// the frames starting at the input's current position.
    ///
    /// Frames ending at or before `offset` are skipped without being decompressed, and no frame
    /// is decompressed past `offset + length`.
    pub fn decompress(
        &mut self,
        input: &mut dyn IndexInput,
        offset: usize,
        length: usize,
        dst: &mut Vec<u8>,
    ) -> Result<()> {
        dst.clear();
        let end = offset + length;
        let mut frame_start = 0usize;
        while frame_start < end {
            let header_start = input.position();
            let (raw_len, stored_len) = match read_frame_header(input) {
                Ok(lens) => lens,
                Err(err) => {
                    return Err(Error::decoding(
                        err,
                        input.name(),
                        format!("frame header at {}", header_start),
                    ))
                }
            };
            if raw_len == 0 || raw_len > self.max_frame_len {
                return Err(self.fail(
                    input,
                    CompressionError::ExceededSize {
                        max: self.max_frame_len,
                        actual: raw_len,
                    },
                ));
            }
            // Checked before anything is allocated for the frame
            let available = input.len().saturating_sub(input.position());
            if stored_len as u64 > available {
                return Err(self.fail(
                    input,
                    CompressionError::Parsing("Frame runs past the end of the file"),
                ));
            }
            let frame_end = frame_start + raw_len;
            if frame_end <= offset {
                let next = input.position() + stored_len as u64;
                input.seek(next)?;
                frame_start = frame_end;
                continue;
            }

            let skip = offset.saturating_sub(frame_start);
            let wanted = end.min(frame_end) - frame_start;
            if let Err(e) = self.decompress_frame(input, raw_len, stored_len, skip, wanted, dst) {
                return Err(self.fail(input, e));
            }
            frame_start = frame_end;
        }
        debug_assert_eq!(dst.len(), length);
        Ok(())
    }

    /// Decompress the first `wanted` raw bytes of the frame and append all but the first `skip`
    /// to `dst`.
    fn decompress_frame(
        &mut self,
        input: &mut dyn IndexInput,
        raw_len: usize,
        stored_len: usize,
        skip: usize,
        wanted: usize,
        dst: &mut Vec<u8>,
    ) -> Result<(), CompressionError> {
        self.compressed.resize(stored_len, 0);
        input
            .read_exact(&mut self.compressed)
            .map_err(|_| CompressionError::Parsing("Frame ended early"))?;
        match self.kind {
            CompressType::None => {
                if stored_len != raw_len {
                    return Err(CompressionError::Parsing(
                        "Uncompressed frame length doesn't match raw length",
                    ));
                }
                dst.extend_from_slice(&self.compressed[skip..wanted]);
            }
            CompressType::Zstd => {
                let start = dst.len();
                dst.resize(start + wanted, 0);
                zstd_decompress_prefix(&self.compressed, &mut dst[start..])?;
                dst.drain(start..start + skip);
            }
        }
        self.decompressed += wanted as u64;
        Ok(())
    }

    fn fail(&self, input: &dyn IndexInput, source: CompressionError) -> Error {
        Error::FailDecompress {
            resource: input.name().to_string(),
            source,
        }
    }
}

fn read_frame_header(input: &mut dyn IndexInput) -> io::Result<(usize, usize)> {
    let raw_len = input.read_vint()? as usize;
    let stored_len = input.read_vint()? as usize;
    Ok((raw_len, stored_len))
}

impl Clone for Decompressor {
    fn clone(&self) -> Self {
        Self::new(self.kind, self.max_frame_len)
    }
}

fn zstd_compress(input: &[u8], output: &mut Vec<u8>, level: i32) -> Result<usize, CompressionError> {
    use zstd_safe::*;
    ZSTD_CCTX.with_borrow_mut(|ctx| {
        // Configure the context for our single-frame, minimal-size header.
        ctx.reset(ResetDirective::SessionAndParameters)?;
        ctx.set_parameter(CParameter::CompressionLevel(level))?;
        ctx.set_parameter(CParameter::DictIdFlag(false))?;
        ctx.set_parameter(CParameter::ChecksumFlag(false))?;
        ctx.set_parameter(CParameter::Format(zstd_safe::FrameFormat::Magicless))?;
        ctx.set_parameter(CParameter::ContentSizeFlag(true))?;
        ctx.set_parameter(CParameter::WindowLog(21))?;
        ctx.set_pledged_src_size(Some(input.len() as u64))?;

        // Reserve space for the output
        output.reserve(compress_bound(input.len()));
        let out_buffer = output.spare_capacity_mut();

        // Perform compression
        let used_len = unsafe {
            let out_buffer = core::slice::from_raw_parts_mut(
                out_buffer.as_mut_ptr() as *mut u8,
                out_buffer.len(),
            );
            let used_len = ctx.compress2(out_buffer, input)?;
            output.set_len(used_len + output.len());
            used_len
        };

        Ok(used_len)
    })
}

/// Stream-decompress a frame until `output` is full, leaving the rest of the frame untouched.
fn zstd_decompress_prefix(input: &[u8], output: &mut [u8]) -> Result<(), CompressionError> {
    use zstd_safe::*;
    let wanted = output.len();
    ZSTD_DCTX.with_borrow_mut(|dtx| {
        dtx.reset(ResetDirective::SessionAndParameters)?;
        dtx.set_parameter(DParameter::Format(FrameFormat::Magicless))?;
        dtx.set_parameter(DParameter::WindowLogMax(21))?;

        let mut out_buffer = OutBuffer::around(output);
        let mut in_buffer = InBuffer::around(input);
        loop {
            let before = (out_buffer.pos(), in_buffer.pos());
            let hint = dtx.decompress_stream(&mut out_buffer, &mut in_buffer)?;
            if out_buffer.pos() == wanted {
                return Ok(());
            }
            if hint == 0 {
                return Err(CompressionError::Parsing(
                    "Decompressed size is smaller than promised size",
                ));
            }
            if before == (out_buffer.pos(), in_buffer.pos()) {
                return Err(CompressionError::Parsing("Frame ended early"));
            }
        }
    })
}
