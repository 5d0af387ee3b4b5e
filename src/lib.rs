//! A chunked, block-compressed document store for segment-based search indexes.
//!
//! Each segment stores the original field values of its documents in two files. The data file
//! holds documents batched into chunks that are compressed as a unit. The index file maps every
//! document ID to the chunk holding it, using a compact two-level index that is loaded into
//! memory when a segment is opened. Retrieving a document seeks straight to its chunk and only
//! decompresses up to the end of that document.
//!
//! Writing goes through [`ChunkedFieldWriter`], one document at a time:
//!
//! ```
//! # use std::sync::Arc;
//! # use stored_fields::*;
//! # fn main() -> Result<()> {
//! let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
//! let format = StoredFieldsFormat::default();
//! let mut fields = FieldInfos::new();
//! let title = fields.add("title");
//! let year = fields.add("year");
//!
//! let mut writer = format.fields_writer(&dir, "_0")?;
//! writer.start_document();
//! writer.write_field(&title, &"Dune".into())?;
//! writer.write_field(&year, &FieldValue::Int(1965))?;
//! writer.finish_document()?;
//! writer.finish(1)?;
//! writer.close()?;
//!
//! let mut reader = format.fields_reader(&dir, &SegmentInfo::new("_0", 1), Arc::new(fields))?;
//! let doc = reader.document(0)?;
//! assert_eq!(doc.get("title"), Some(&FieldValue::from("Dune")));
//! assert_eq!(doc.get("year"), Some(&FieldValue::Int(1965)));
//! # Ok(())
//! # }
//! ```
//!
//! Readers are cheap to clone, and each clone can be handed to its own thread. Selective loading
//! is done with a [`StoredFieldVisitor`], which sees each field's [`FieldInfo`] before deciding
//! whether to decode it.

mod buffer;
pub mod codec;
mod compress;
mod error;
mod field;
pub mod format;
mod index_reader;
mod index_writer;
pub mod packed;
mod reader;
pub mod store;
pub mod varint;
mod visitor;
mod writer;

pub use buffer::{oversize, ChunkBuffer};
pub use compress::{CompressionError, CompressionMode, Compressor, Decompressor};
pub use error::{Error, Result};
pub use field::{FieldInfo, FieldInfos, FieldType, FieldValue};
pub use format::{SegmentInfo, StoredFieldsConfig, StoredFieldsFormat};
pub use index_reader::ChunkIndexReader;
pub use index_writer::ChunkIndexWriter;
pub use reader::ChunkedFieldReader;
pub use store::{Directory, FsDirectory, IndexInput, IndexOutput, RamDirectory};
pub use visitor::{Document, DocumentVisitor, Status, StoredField, StoredFieldVisitor};
pub use writer::ChunkedFieldWriter;

/// A document's position within its segment.
pub type DocId = u32;
