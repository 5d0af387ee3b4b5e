//! Writes a segment's stored fields.
//!
//! Documents are serialized into an in-memory chunk buffer. Once the buffer holds at least
//! `chunk_size` bytes or [`MAX_DOCUMENTS_PER_CHUNK`] documents, the chunk is flushed: its
//! location goes to the chunk index, then the chunk header and compressed payload are appended
//! to the data file.
//!
//! ```text
//! chunk: docBase (vint), chunkDocs (vint), fieldCounts (ints), lengths (ints), frames...
//! ```
//!
//! Buffers of at least twice the chunk size are compressed as independent `chunk_size` slices,
//! so readers can stop decompressing once they have the document they want.

use crate::buffer::{oversize, ChunkBuffer};
use crate::codec;
use crate::compress::Compressor;
use crate::error::Result;
use crate::field::{FieldInfo, FieldValue};
use crate::format::{
    StoredFieldsConfig, CODEC_SFX_DAT, CODEC_SFX_IDX, FIELDS_EXTENSION, FIELDS_INDEX_EXTENSION,
    MAX_DOCUMENTS_PER_CHUNK, VERSION_CURRENT,
};
use crate::index_writer::ChunkIndexWriter;
use crate::packed::{write_ints, PACKED_VERSION_CURRENT};
use crate::store::{delete_files_ignoring_errors, segment_file_name, Directory, IndexOutput};
use crate::varint::WriteVarExt;
use byteorder::WriteBytesExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Initial capacity of the per-document metadata arrays.
const INITIAL_DOCS: usize = 16;

pub struct ChunkedFieldWriter {
    directory: Arc<dyn Directory>,
    data_name: String,
    index_name: String,
    fields_stream: Box<dyn IndexOutput>,
    /// Taken by `finish`.
    index_writer: Option<ChunkIndexWriter>,
    compressor: Compressor,
    chunk_size: usize,

    buffered_docs: ChunkBuffer,
    /// Field count of each buffered document.
    num_stored_fields: Vec<u32>,
    /// End offset of each buffered document in `buffered_docs`.
    end_offsets: Vec<u32>,
    /// ID of the first buffered document.
    doc_base: u32,
    num_buffered_docs: usize,
    in_document: bool,

    num_chunks: u64,
    num_dirty_chunks: u64,
}

impl ChunkedFieldWriter {
    /// Create the data and index files for `segment` and write their headers.
    ///
    /// If anything fails, whatever files were already created are deleted again.
    pub fn new(
        directory: Arc<dyn Directory>,
        segment: &str,
        segment_suffix: &str,
        format_name: &str,
        config: &StoredFieldsConfig,
    ) -> Result<Self> {
        config.validate();
        let index_name = segment_file_name(segment, segment_suffix, FIELDS_INDEX_EXTENSION);
        let data_name = segment_file_name(segment, segment_suffix, FIELDS_EXTENSION);

        let index_out = directory.create_output(&index_name)?;
        // Only files this writer created get cleaned up: an existing data file isn't ours
        let fields_stream = match directory.create_output(&data_name) {
            Ok(out) => out,
            Err(err) => {
                warn!(segment, err = %err, "failed to create stored fields data file");
                delete_files_ignoring_errors(directory.as_ref(), &[index_name]);
                return Err(err.into());
            }
        };
        match Self::init(index_out, fields_stream, format_name, config) {
            Ok((fields_stream, index_writer)) => Ok(Self {
                directory,
                data_name,
                index_name,
                fields_stream,
                index_writer: Some(index_writer),
                compressor: Compressor::new(config.compression),
                chunk_size: config.chunk_size,
                buffered_docs: ChunkBuffer::with_chunk_size(config.chunk_size),
                num_stored_fields: vec![0; INITIAL_DOCS],
                end_offsets: vec![0; INITIAL_DOCS],
                doc_base: 0,
                num_buffered_docs: 0,
                in_document: false,
                num_chunks: 0,
                num_dirty_chunks: 0,
            }),
            Err(err) => {
                warn!(segment, err = %err, "failed to create stored fields writer");
                delete_files_ignoring_errors(directory.as_ref(), &[data_name, index_name]);
                Err(err)
            }
        }
    }

    fn init(
        mut index_out: Box<dyn IndexOutput>,
        mut fields_stream: Box<dyn IndexOutput>,
        format_name: &str,
        config: &StoredFieldsConfig,
    ) -> Result<(Box<dyn IndexOutput>, ChunkIndexWriter)> {
        let codec_name_idx = format!("{}{}", format_name, CODEC_SFX_IDX);
        let codec_name_dat = format!("{}{}", format_name, CODEC_SFX_DAT);
        codec::write_header(&mut index_out, &codec_name_idx, VERSION_CURRENT)?;
        codec::write_header(&mut fields_stream, &codec_name_dat, VERSION_CURRENT)?;
        debug_assert_eq!(codec::header_length(&codec_name_idx), index_out.file_pointer());
        debug_assert_eq!(codec::header_length(&codec_name_dat), fields_stream.file_pointer());

        let index_writer = ChunkIndexWriter::new(index_out, config.index_block_size)?;

        fields_stream.write_vint(config.chunk_size as u32)?;
        fields_stream.write_vint(PACKED_VERSION_CURRENT)?;
        fields_stream.write_u8(config.compression.compress_type().into())?;
        Ok((fields_stream, index_writer))
    }

    /// Begin a new document. Its fields follow through [`write_field`][Self::write_field].
    pub fn start_document(&mut self) {
        assert!(!self.in_document, "previous document was not finished");
        if self.num_buffered_docs == self.num_stored_fields.len() {
            let new_len = oversize(self.num_buffered_docs + 1, 4);
            self.num_stored_fields.resize(new_len, 0);
            self.end_offsets.resize(new_len, 0);
        }
        self.num_stored_fields[self.num_buffered_docs] = 0;
        self.num_buffered_docs += 1;
        self.in_document = true;
    }

    pub fn write_field(&mut self, field: &FieldInfo, value: &FieldValue) -> Result<()> {
        assert!(self.in_document, "write_field called outside of a document");
        value.write_to(field.number, &mut self.buffered_docs)?;
        self.num_stored_fields[self.num_buffered_docs - 1] += 1;
        Ok(())
    }

    /// End the current document, flushing the chunk if it's full.
    pub fn finish_document(&mut self) -> Result<()> {
        assert!(self.in_document, "finish_document called outside of a document");
        self.in_document = false;
        self.end_offsets[self.num_buffered_docs - 1] = end_offset(self.buffered_docs.len());
        if self.trigger_flush() {
            self.flush()?;
        }
        Ok(())
    }

    fn trigger_flush(&self) -> bool {
        self.buffered_docs.len() >= self.chunk_size
            || self.num_buffered_docs >= MAX_DOCUMENTS_PER_CHUNK
    }

    fn flush(&mut self) -> Result<()> {
        let chunk_docs = self.num_buffered_docs;
        let start_pointer = self.fields_stream.file_pointer();
        match self.index_writer.as_mut() {
            Some(index_writer) => index_writer.write_index(chunk_docs as u32, start_pointer)?,
            None => panic!("chunk flushed after finish"),
        }

        // Turn end offsets into lengths
        let lengths = &mut self.end_offsets[..chunk_docs];
        for i in (1..chunk_docs).rev() {
            assert!(
                lengths[i] >= lengths[i - 1],
                "negative length for document {} of chunk",
                i
            );
            lengths[i] -= lengths[i - 1];
        }

        self.fields_stream.write_vint(self.doc_base)?;
        self.fields_stream.write_vint(chunk_docs as u32)?;
        write_ints(&self.num_stored_fields[..chunk_docs], &mut self.fields_stream)?;
        write_ints(&self.end_offsets[..chunk_docs], &mut self.fields_stream)?;

        let raw = self.buffered_docs.as_slice();
        let sliced = raw.len() >= 2 * self.chunk_size;
        if sliced {
            for slice in raw.chunks(self.chunk_size) {
                self.compressor.compress(slice, &mut self.fields_stream)?;
            }
        } else {
            self.compressor.compress(raw, &mut self.fields_stream)?;
        }
        debug!(
            doc_base = self.doc_base,
            chunk_docs,
            raw_bytes = raw.len(),
            stored_bytes = self.fields_stream.file_pointer() - start_pointer,
            sliced,
            "flushed stored fields chunk"
        );

        self.doc_base += chunk_docs as u32;
        self.num_buffered_docs = 0;
        self.buffered_docs.clear();
        self.num_chunks += 1;
        Ok(())
    }

    /// Flush the last chunk and complete both files.
    ///
    /// # Panics
    ///
    /// Panics if `num_docs` isn't the number of documents written, or if a document is still
    /// open.
    pub fn finish(&mut self, num_docs: u32) -> Result<()> {
        assert!(!self.in_document, "finish called with an unfinished document");
        if self.num_buffered_docs > 0 {
            // Below both thresholds, or it would already have been flushed
            self.num_dirty_chunks += 1;
            self.flush()?;
        } else {
            assert!(self.buffered_docs.is_empty());
        }
        assert!(
            self.doc_base == num_docs,
            "Wrote {} docs, finish called with num_docs={}",
            self.doc_base,
            num_docs
        );

        let max_pointer = self.fields_stream.file_pointer();
        match self.index_writer.take() {
            Some(index_writer) => index_writer.finish(num_docs, max_pointer)?,
            None => panic!("finish called twice"),
        }
        self.fields_stream.write_vlong(self.num_chunks)?;
        self.fields_stream.write_vlong(self.num_dirty_chunks)?;
        codec::write_footer(self.fields_stream.as_mut())?;
        debug!(
            segment = %self.data_name,
            num_docs,
            num_chunks = self.num_chunks,
            num_dirty_chunks = self.num_dirty_chunks,
            bytes = self.fields_stream.file_pointer(),
            "finished stored fields"
        );
        Ok(())
    }

    /// Close both files. Files closed before [`finish`][Self::finish] are left incomplete.
    pub fn close(self) -> Result<()> {
        let index_result = match self.index_writer {
            Some(index_writer) => index_writer.close(),
            None => Ok(()),
        };
        let data_result = self.fields_stream.close();
        index_result?;
        data_result?;
        Ok(())
    }

    /// Give up on the segment: close both files and delete them.
    pub fn abort(self) {
        warn!(segment = %self.data_name, docs = self.num_docs(), "aborting stored fields");
        let directory = self.directory.clone();
        let names = [self.data_name.clone(), self.index_name.clone()];
        if let Err(err) = self.close() {
            debug!(err = %err, "ignoring close failure during abort");
        }
        delete_files_ignoring_errors(directory.as_ref(), &names);
    }

    /// Documents started so far, including buffered ones.
    pub fn num_docs(&self) -> u32 {
        self.doc_base + self.num_buffered_docs as u32
    }

    /// Chunks flushed so far.
    pub fn num_chunks(&self) -> u64 {
        self.num_chunks
    }

    pub fn num_dirty_chunks(&self) -> u64 {
        self.num_dirty_chunks
    }

    /// Bytes waiting in the current chunk.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_docs.len()
    }
}

impl std::fmt::Debug for ChunkedFieldWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedFieldWriter")
            .field("data_name", &self.data_name)
            .field("chunk_size", &self.chunk_size)
            .field("doc_base", &self.doc_base)
            .field("num_buffered_docs", &self.num_buffered_docs)
            .field("num_chunks", &self.num_chunks)
            .finish()
    }
}

/// Offsets within a chunk are stored as u32.
fn end_offset(buffered: usize) -> u32 {
    assert!(
        buffered <= u32::MAX as usize,
        "chunk buffer holds {} bytes, more than a chunk can address",
        buffered
    );
    buffered as u32
}
