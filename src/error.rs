use crate::compress::CompressionError;
use std::{fmt, io};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// Failure reported by the underlying directory or file.
    Io(io::Error),
    /// Data read from a stored fields file doesn't match the format's invariants: a document
    /// outside the chunk it was located in, a length/field-count mismatch, an oversized bit width,
    /// an unknown field, and so on.
    Corrupt { resource: String, detail: String },
    /// The codec header or footer failed to parse: wrong magic number or codec name.
    BadHeader { resource: String, detail: String },
    /// The file was written with a format version this crate can't read.
    UnsupportedVersion {
        resource: String,
        version: u32,
        min: u32,
        max: u32,
    },
    /// The checksum stored in a file's footer doesn't match its contents.
    ChecksumMismatch {
        resource: String,
        expected: u64,
        actual: u64,
    },
    /// Decompressing a chunk's payload failed.
    FailDecompress {
        resource: String,
        source: CompressionError,
    },
}

impl Error {
    pub(crate) fn corrupt(resource: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Corrupt {
            resource: resource.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn bad_header(resource: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::BadHeader {
            resource: resource.into(),
            detail: detail.into(),
        }
    }

    /// Classify an I/O error hit while decoding `resource`. Truncated or malformed content and
    /// seeks past the end of the file are corruption; anything else is the storage failing.
    pub(crate) fn decoding(
        err: io::Error,
        resource: impl Into<String>,
        context: impl fmt::Display,
    ) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::InvalidInput => {
                Error::corrupt(resource, format!("{}: {}", context, err))
            }
            _ => Error::Io(err),
        }
    }

    /// Returns true if this error means the stored data itself is damaged, as opposed to the
    /// storage failing to deliver it.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Error::Io(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref err) => write!(f, "I/O failure: {}", err),
            Error::Corrupt {
                ref resource,
                ref detail,
            } => write!(f, "Corrupt stored fields ({}): {}", resource, detail),
            Error::BadHeader {
                ref resource,
                ref detail,
            } => write!(f, "Bad codec header ({}): {}", resource, detail),
            Error::UnsupportedVersion {
                ref resource,
                version,
                min,
                max,
            } => write!(
                f,
                "Unsupported format version {} in {}, must be between {} and {}",
                version, resource, min, max
            ),
            Error::ChecksumMismatch {
                ref resource,
                expected,
                actual,
            } => write!(
                f,
                "Checksum failed for {}: expected {:#010x}, actual {:#010x}",
                resource, expected, actual
            ),
            Error::FailDecompress {
                ref resource,
                ref source,
            } => write!(f, "Failed decompression step ({}): {}", resource, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            Error::FailDecompress { ref source, .. } => Some(source),
            _ => None,
        }
    }
}

impl std::convert::From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
