//! Random access to a segment's stored fields.
//!
//! Reading a document seeks straight to its chunk through the in-memory chunk index,
//! re-validates the chunk header, and decompresses only the bytes up to the end of the requested
//! document. A reader is not shared between threads; clone it instead. Clones share the field
//! table and chunk index but have their own file cursor and scratch buffers.

use crate::codec;
use crate::compress::{CompressType, CompressionError, Decompressor};
use crate::error::{Error, Result};
use crate::field::{read_slice, skip_value, split_key, FieldInfos, FieldType};
use crate::format::{
    SegmentInfo, CODEC_SFX_DAT, CODEC_SFX_IDX, FIELDS_EXTENSION, FIELDS_INDEX_EXTENSION,
    MAX_DOCUMENTS_PER_CHUNK, VERSION_CHUNK_STATS, VERSION_CURRENT, VERSION_START,
};
use crate::index_reader::ChunkIndexReader;
use crate::packed::{check_version, read_ints};
use crate::store::{segment_file_name, Directory, IndexInput};
use crate::varint::ReadVarExt;
use crate::visitor::{Document, DocumentVisitor, Status, StoredFieldVisitor};
use crate::DocId;
use byteorder::{BigEndian, ReadBytesExt};
use std::convert::TryFrom;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct ChunkedFieldReader {
    version: u32,
    field_infos: Arc<FieldInfos>,
    index: ChunkIndexReader,
    fields_stream: Box<dyn IndexInput>,
    chunk_size: usize,
    packed_ints_version: u32,
    decompressor: Decompressor,
    num_docs: u32,
    num_chunks: u64,
    num_dirty_chunks: u64,

    // Scratch space, reused between documents
    num_stored_fields: Vec<u32>,
    lengths: Vec<u32>,
    bytes: Vec<u8>,
}

impl ChunkedFieldReader {
    /// Open the stored fields of a segment.
    ///
    /// The index file is read into memory and its checksum verified. The data file's header and
    /// footer are checked, but not its checksum: see [`check_integrity`][Self::check_integrity].
    pub fn open(
        directory: &dyn Directory,
        segment: &SegmentInfo,
        segment_suffix: &str,
        field_infos: Arc<FieldInfos>,
        format_name: &str,
    ) -> Result<Self> {
        let index_name = segment_file_name(&segment.name, segment_suffix, FIELDS_INDEX_EXTENSION);
        let data_name = segment_file_name(&segment.name, segment_suffix, FIELDS_EXTENSION);

        // Load the index whole
        let mut index_bytes = Vec::new();
        directory
            .open_input(&index_name)?
            .read_to_end(&mut index_bytes)?;
        let mut index_in = codec::check_footer(&index_bytes, &index_name)?;
        let codec_name_idx = format!("{}{}", format_name, CODEC_SFX_IDX);
        let version = codec::check_header(
            &mut index_in,
            &codec_name_idx,
            VERSION_START,
            VERSION_CURRENT,
            &index_name,
        )?;
        let index = ChunkIndexReader::read(&mut index_in, &index_name)?;
        if index.max_doc() != segment.max_doc {
            return Err(Error::corrupt(
                &index_name,
                format!(
                    "index covers {} docs, but segment has {}",
                    index.max_doc(),
                    segment.max_doc
                ),
            ));
        }

        let mut fields_stream = directory.open_input(&data_name)?;
        let codec_name_dat = format!("{}{}", format_name, CODEC_SFX_DAT);
        let data_version = codec::check_header(
            fields_stream.as_mut(),
            &codec_name_dat,
            VERSION_START,
            VERSION_CURRENT,
            &data_name,
        )?;
        if data_version != version {
            return Err(Error::corrupt(
                &data_name,
                format!(
                    "Version mismatch between stored fields index and data: {} != {}",
                    version, data_version
                ),
            ));
        }
        debug_assert_eq!(
            codec::header_length(&codec_name_dat),
            fields_stream.position()
        );

        let header_err = |err| Error::decoding(err, &data_name, "data file header");
        let chunk_size = fields_stream.read_vint().map_err(header_err)? as usize;
        if chunk_size == 0 || chunk_size > (i32::MAX as usize) / 2 {
            return Err(Error::corrupt(
                &data_name,
                format!("chunkSize={}", chunk_size),
            ));
        }
        let packed_ints_version = fields_stream.read_vint().map_err(header_err)?;
        check_version(packed_ints_version, &data_name)?;
        let compression = CompressType::try_from(fields_stream.read_u8().map_err(header_err)?)
            .map_err(|t| Error::FailDecompress {
                resource: data_name.clone(),
                source: CompressionError::UnknownType(t),
            })?;

        codec::retrieve_checksum(fields_stream.as_mut())?;
        let footer_start = fields_stream.len() - codec::FOOTER_LENGTH;
        let max_pointer = index.max_pointer();
        if max_pointer > footer_start {
            return Err(Error::corrupt(
                &data_name,
                format!(
                    "maxPointer={} is past the footer at {}",
                    max_pointer, footer_start
                ),
            ));
        }
        fields_stream.seek(max_pointer)?;
        let stats_err = |err| Error::decoding(err, &data_name, "chunk stats");
        let (num_chunks, num_dirty_chunks) = if version >= VERSION_CHUNK_STATS {
            (
                fields_stream.read_vlong().map_err(stats_err)?,
                fields_stream.read_vlong().map_err(stats_err)?,
            )
        } else {
            (index.num_chunks(), 0)
        };
        if num_chunks != index.num_chunks() || num_dirty_chunks > num_chunks {
            return Err(Error::corrupt(
                &data_name,
                format!(
                    "invalid chunk counts: numChunks={}, numDirtyChunks={}, indexed={}",
                    num_chunks,
                    num_dirty_chunks,
                    index.num_chunks()
                ),
            ));
        }
        if fields_stream.position() != footer_start {
            return Err(Error::corrupt(
                &data_name,
                format!(
                    "chunk stats end at {}, but the footer starts at {}",
                    fields_stream.position(),
                    footer_start
                ),
            ));
        }

        debug!(
            segment = %segment.name,
            num_docs = segment.max_doc,
            num_chunks,
            num_dirty_chunks,
            index_blocks = index.num_blocks(),
            "opened stored fields"
        );
        Ok(Self {
            version,
            field_infos,
            index,
            fields_stream,
            chunk_size,
            packed_ints_version,
            decompressor: Decompressor::new(compression, 2 * chunk_size),
            num_docs: segment.max_doc,
            num_chunks,
            num_dirty_chunks,
            num_stored_fields: Vec::new(),
            lengths: Vec::new(),
            bytes: Vec::with_capacity(2 * chunk_size),
        })
    }

    /// Feed the stored fields of `doc_id` to the visitor.
    ///
    /// # Panics
    ///
    /// Panics if `doc_id` is not below the segment's document count.
    pub fn visit_document(
        &mut self,
        doc_id: DocId,
        visitor: &mut dyn StoredFieldVisitor,
    ) -> Result<()> {
        let start_pointer = self.index.start_pointer(doc_id);
        // The data file isn't checksummed at open, so malformed chunks surface while decoding
        self.visit_chunk(doc_id, start_pointer, visitor)
            .map_err(|err| match err {
                Error::Io(err) => {
                    let err = Error::decoding(
                        err,
                        self.fields_stream.name(),
                        format!("docID={}, startPointer={}", doc_id, start_pointer),
                    );
                    if err.is_corruption() {
                        warn!(doc_id, start_pointer, err = %err, "failed to decode chunk");
                    }
                    err
                }
                err => err,
            })
    }

    fn visit_chunk(
        &mut self,
        doc_id: DocId,
        start_pointer: u64,
        visitor: &mut dyn StoredFieldVisitor,
    ) -> Result<()> {
        let resource = self.fields_stream.name().to_string();
        self.fields_stream.seek(start_pointer)?;

        let doc_base = self.fields_stream.read_vint()?;
        let chunk_docs = self.fields_stream.read_vint()? as usize;
        if doc_id < doc_base
            || (doc_id - doc_base) as usize >= chunk_docs
            || chunk_docs > MAX_DOCUMENTS_PER_CHUNK
            || doc_base as u64 + chunk_docs as u64 > self.num_docs as u64
        {
            warn!(resource = %resource, doc_id, doc_base, chunk_docs, "chunk doesn't hold document");
            return Err(Error::corrupt(
                resource,
                format!(
                    "docID={}, docBase={}, chunkDocs={}, numDocs={}",
                    doc_id, doc_base, chunk_docs, self.num_docs
                ),
            ));
        }

        read_ints(
            &mut self.fields_stream,
            self.packed_ints_version,
            chunk_docs,
            &mut self.num_stored_fields,
            &resource,
        )?;
        read_ints(
            &mut self.fields_stream,
            self.packed_ints_version,
            chunk_docs,
            &mut self.lengths,
            &resource,
        )?;
        // Only the empty document serializes to nothing
        for (&len, &fields) in self.lengths.iter().zip(self.num_stored_fields.iter()) {
            if (len == 0) != (fields == 0) {
                return Err(Error::corrupt(
                    resource,
                    format!("length={}, numStoredFields={}", len, fields),
                ));
            }
        }

        let index = (doc_id - doc_base) as usize;
        let offset: usize = self.lengths[..index].iter().map(|&l| l as usize).sum();
        let length = self.lengths[index] as usize;
        let num_fields = self.num_stored_fields[index];
        if num_fields == 0 {
            trace!(doc_id, "empty document");
            return Ok(());
        }

        // Large documents get a buffer of their own, so the scratch buffer stays bounded
        let mut large = Vec::new();
        let data = if offset + length <= 2 * self.chunk_size {
            self.decompressor
                .decompress(self.fields_stream.as_mut(), offset, length, &mut self.bytes)?;
            &self.bytes
        } else {
            self.decompressor
                .decompress(self.fields_stream.as_mut(), offset, length, &mut large)?;
            &large
        };
        if data.len() != length {
            return Err(Error::corrupt(
                resource,
                format!("decompressed {} bytes, expected {}", data.len(), length),
            ));
        }

        read_document(&self.field_infos, data, num_fields, visitor, &resource)?;
        trace!(doc_id, doc_base, num_fields, length, "visited document");
        Ok(())
    }

    /// Load every stored field of `doc_id`.
    pub fn document(&mut self, doc_id: DocId) -> Result<Document> {
        let mut visitor = DocumentVisitor::new();
        self.visit_document(doc_id, &mut visitor)?;
        Ok(visitor.into_document())
    }

    /// Verify the checksum of the entire data file.
    pub fn check_integrity(&self) -> Result<()> {
        let mut input = self.fields_stream.clone_input();
        codec::checksum_entire_file(input.as_mut())?;
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn packed_ints_version(&self) -> u32 {
        self.packed_ints_version
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn num_chunks(&self) -> u64 {
        self.num_chunks
    }

    /// Chunks that were flushed before reaching either size threshold.
    pub fn num_dirty_chunks(&self) -> u64 {
        self.num_dirty_chunks
    }

    pub fn max_pointer(&self) -> u64 {
        self.index.max_pointer()
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    /// Raw bytes this reader has decompressed so far.
    pub fn decompressed_bytes(&self) -> u64 {
        self.decompressor.decompressed_bytes()
    }
}

impl Clone for ChunkedFieldReader {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            field_infos: self.field_infos.clone(),
            index: self.index.clone(),
            fields_stream: self.fields_stream.clone_input(),
            chunk_size: self.chunk_size,
            packed_ints_version: self.packed_ints_version,
            decompressor: self.decompressor.clone(),
            num_docs: self.num_docs,
            num_chunks: self.num_chunks,
            num_dirty_chunks: self.num_dirty_chunks,
            num_stored_fields: Vec::new(),
            lengths: Vec::new(),
            bytes: Vec::with_capacity(2 * self.chunk_size),
        }
    }
}

impl std::fmt::Debug for ChunkedFieldReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedFieldReader")
            .field("resource", &self.fields_stream.name())
            .field("version", &self.version)
            .field("chunk_size", &self.chunk_size)
            .field("num_docs", &self.num_docs)
            .field("num_chunks", &self.num_chunks)
            .finish()
    }
}

/// Decode `num_fields` fields from a document's bytes, handing them to the visitor.
fn read_document(
    field_infos: &FieldInfos,
    mut data: &[u8],
    num_fields: u32,
    visitor: &mut dyn StoredFieldVisitor,
    resource: &str,
) -> Result<()> {
    let truncated = |err: io::Error| Error::corrupt(resource, format!("bad field data: {}", err));
    for _ in 0..num_fields {
        let key = data.read_vlong().map_err(truncated)?;
        let (number, field_type) = split_key(key, resource)?;
        let info = field_infos.by_number(number).ok_or_else(|| {
            Error::corrupt(resource, format!("unknown field number {}", number))
        })?;
        match visitor.needs_field(info) {
            Status::Yes => match field_type {
                FieldType::String => {
                    let bytes = read_slice(&mut data).map_err(truncated)?;
                    let value = std::str::from_utf8(bytes).map_err(|e| {
                        Error::corrupt(resource, format!("field {:?}: {}", info.name, e))
                    })?;
                    visitor.string_field(info, value);
                }
                FieldType::Binary => {
                    let value = read_slice(&mut data).map_err(truncated)?;
                    visitor.binary_field(info, value);
                }
                FieldType::Int => visitor.int_field(info, data.read_zint().map_err(truncated)?),
                FieldType::Float => {
                    let bits = data.read_u32::<BigEndian>().map_err(truncated)?;
                    visitor.float_field(info, f32::from_bits(bits));
                }
                FieldType::Long => visitor.long_field(info, data.read_zlong().map_err(truncated)?),
                FieldType::Double => {
                    let bits = data.read_u64::<BigEndian>().map_err(truncated)?;
                    visitor.double_field(info, f64::from_bits(bits));
                }
            },
            Status::No => skip_value(field_type, &mut data).map_err(truncated)?,
            Status::Stop => return Ok(()),
        }
    }
    if !data.is_empty() {
        return Err(Error::corrupt(
            resource,
            format!("{} bytes left over after the last field", data.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compress::CompressionMode;
    use crate::field::{FieldInfo, FieldValue};
    use crate::format::{StoredFieldsConfig, StoredFieldsFormat};
    use crate::index_writer::ChunkIndexWriter;
    use crate::store::RamDirectory;
    use crate::writer::ChunkedFieldWriter;

    struct Segment {
        dir: RamDirectory,
        shared: Arc<dyn Directory>,
        format: StoredFieldsFormat,
        infos: Arc<FieldInfos>,
        num_docs: u32,
    }

    fn write(
        chunk_size: usize,
        compression: CompressionMode,
        docs: &[Vec<(&str, FieldValue)>],
    ) -> Segment {
        let dir = RamDirectory::new();
        let shared: Arc<dyn Directory> = Arc::new(dir.clone());
        let format = StoredFieldsFormat::new(
            "Test",
            "",
            StoredFieldsConfig {
                chunk_size,
                compression,
                index_block_size: 3,
            },
        );
        let mut infos = FieldInfos::new();
        let mut w = format.fields_writer(&shared, "_0").unwrap();
        for doc in docs {
            w.start_document();
            for (name, value) in doc {
                let info = infos.add(name);
                w.write_field(&info, value).unwrap();
            }
            w.finish_document().unwrap();
        }
        w.finish(docs.len() as u32).unwrap();
        w.close().unwrap();
        Segment {
            dir,
            shared,
            format,
            infos: Arc::new(infos),
            num_docs: docs.len() as u32,
        }
    }

    fn open(seg: &Segment) -> Result<ChunkedFieldReader> {
        seg.format.fields_reader(
            &seg.shared,
            &SegmentInfo::new("_0", seg.num_docs),
            seg.infos.clone(),
        )
    }

    fn text_docs(n: usize) -> Vec<Vec<(&'static str, FieldValue)>> {
        (0..n)
            .map(|i| vec![("body", FieldValue::String(format!("document{:02}", i)))])
            .collect()
    }

    #[test]
    fn reads_any_doc_in_any_order() {
        // Five docs of 12 serialized bytes with 16-byte chunks: flushes after docs 1 and 3, and
        // the last doc is flushed by finish
        let seg = write(16, CompressionMode::fast(), &text_docs(5)[..]);
        let mut reader = open(&seg).unwrap();
        assert_eq!(reader.num_chunks(), 3);
        assert_eq!(reader.num_dirty_chunks(), 1);
        assert_eq!(reader.version(), VERSION_CURRENT);

        let doc = reader.document(3).unwrap();
        assert_eq!(doc.get("body"), Some(&FieldValue::from("document03")));
        for &i in &[4, 0, 2, 1, 3] {
            let doc = reader.document(i).unwrap();
            assert_eq!(doc.len(), 1);
            assert_eq!(doc.get("body"), Some(&FieldValue::String(format!("document{:02}", i))));
        }
        reader.check_integrity().unwrap();
    }

    #[test]
    fn empty_documents() {
        let docs = vec![
            vec![],
            vec![("a", FieldValue::Int(1))],
            vec![],
            vec![],
            vec![("b", FieldValue::Double(2.5))],
        ];
        let seg = write(1024, CompressionMode::None, &docs);
        let mut reader = open(&seg).unwrap();
        for (i, expected) in docs.iter().enumerate() {
            let doc = reader.document(i as u32).unwrap();
            assert_eq!(doc.len(), expected.len());
        }
        assert_eq!(reader.document(4).unwrap().get("b"), Some(&FieldValue::Double(2.5)));
    }

    #[test]
    fn empty_segment() {
        let seg = write(1024, CompressionMode::fast(), &[]);
        let reader = open(&seg).unwrap();
        assert_eq!(reader.num_docs(), 0);
        assert_eq!(reader.num_chunks(), 0);
        reader.check_integrity().unwrap();
    }

    /// Answers with a fixed status per field name, recording what it's given.
    struct Picky {
        status: fn(&str) -> Status,
        seen: Vec<String>,
        values: Vec<FieldValue>,
    }

    impl StoredFieldVisitor for Picky {
        fn needs_field(&mut self, field: &FieldInfo) -> Status {
            self.seen.push(field.name.clone());
            (self.status)(&field.name)
        }

        fn string_field(&mut self, _field: &FieldInfo, value: &str) {
            self.values.push(FieldValue::from(value));
        }

        fn long_field(&mut self, _field: &FieldInfo, value: i64) {
            self.values.push(FieldValue::Long(value));
        }

        fn float_field(&mut self, _field: &FieldInfo, value: f32) {
            self.values.push(FieldValue::Float(value));
        }
    }

    #[test]
    fn visitor_skip_and_stop() {
        let docs = vec![vec![
            ("title", FieldValue::from("skipped")),
            ("id", FieldValue::Long(-42)),
            ("raw", FieldValue::Binary(vec![0; 100])),
            ("score", FieldValue::Float(0.25)),
            ("tail", FieldValue::from("never seen")),
        ]];
        let seg = write(64, CompressionMode::fast(), &docs);
        let mut reader = open(&seg).unwrap();

        let mut v = Picky {
            status: |name| match name {
                "title" | "raw" => Status::No,
                "tail" => Status::Stop,
                _ => Status::Yes,
            },
            seen: Vec::new(),
            values: Vec::new(),
        };
        reader.visit_document(0, &mut v).unwrap();
        assert_eq!(v.seen, vec!["title", "id", "raw", "score", "tail"]);
        assert_eq!(v.values, vec![FieldValue::Long(-42), FieldValue::Float(0.25)]);

        let mut v = Picky {
            status: |_| Status::Stop,
            seen: Vec::new(),
            values: Vec::new(),
        };
        reader.visit_document(0, &mut v).unwrap();
        assert_eq!(v.seen, vec!["title"]);
        assert!(v.values.is_empty());

        let doc = {
            let mut v = DocumentVisitor::with_fields(["score", "id"]);
            reader.visit_document(0, &mut v).unwrap();
            v.into_document()
        };
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.fields[0].name, "id");
    }

    #[test]
    fn partial_decompression() {
        // 10 + 5 + 30 serialized bytes: one chunk of 45 bytes, sliced into 16-byte frames
        let docs = vec![
            vec![("f", FieldValue::from("12345678"))],
            vec![("f", FieldValue::from("abc"))],
            vec![("f", FieldValue::String("x".repeat(28)))],
        ];
        for mode in [CompressionMode::None, CompressionMode::fast()] {
            let seg = write(16, mode, &docs);
            let mut reader = open(&seg).unwrap();
            assert_eq!(reader.num_chunks(), 1);
            assert_eq!(reader.num_dirty_chunks(), 0);

            reader.document(0).unwrap();
            assert_eq!(reader.decompressed_bytes(), 10);
            reader.document(1).unwrap();
            assert_eq!(reader.decompressed_bytes(), 10 + 15);
            let doc = reader.document(2).unwrap();
            assert_eq!(doc.get("f").and_then(|v| v.as_str()).map(str::len), Some(28));
            assert_eq!(reader.decompressed_bytes(), 10 + 15 + 45);
        }
    }

    #[test]
    fn large_document() {
        let big: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let docs = vec![
            vec![("small", FieldValue::Int(1))],
            vec![("big", FieldValue::Binary(big.clone()))],
            vec![("small", FieldValue::Int(3))],
        ];
        let seg = write(1024, CompressionMode::fast(), &docs);
        let mut reader = open(&seg).unwrap();
        assert_eq!(reader.document(1).unwrap().get("big"), Some(&FieldValue::Binary(big)));
        // The scratch buffer was left alone
        assert!(reader.bytes.capacity() < 100_000);
        assert_eq!(reader.document(2).unwrap().get("small"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn corrupted_start_pointer() {
        let seg = write(16, CompressionMode::fast(), &text_docs(6)[..]);
        let mut reader = open(&seg).unwrap();

        // Point every document at the first chunk
        let first = reader.index.start_pointer(0);
        let fake = RamDirectory::new();
        let mut w = ChunkIndexWriter::new(fake.create_output("fake").unwrap(), 16).unwrap();
        w.write_index(6, first).unwrap();
        w.finish(6, reader.max_pointer()).unwrap();
        let bytes = fake.read_file("fake").unwrap();
        let content = codec::check_footer(&bytes, "fake").unwrap();
        reader.index = ChunkIndexReader::read(&mut &content[..], "fake").unwrap();

        reader.document(1).unwrap();
        let err = reader.document(4).unwrap_err();
        match err {
            Error::Corrupt { detail, .. } => {
                assert_eq!(detail, "docID=4, docBase=0, chunkDocs=2, numDocs=6")
            }
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn malformed_chunk_header() {
        let seg = write(16, CompressionMode::fast(), &text_docs(6)[..]);
        let start = open(&seg).unwrap().index.start_pointer(0) as usize;

        // An overlong docBase vint
        let mut data = seg.dir.read_file("_0.fdt").unwrap();
        data[start..start + 5].copy_from_slice(&[0xFF; 5]);
        seg.dir.write_file("_0.fdt", data).unwrap();

        let mut reader = open(&seg).unwrap();
        let err = reader.document(0).unwrap_err();
        assert!(err.is_corruption());
        match err {
            Error::Corrupt { resource, detail } => {
                assert_eq!(resource, "_0.fdt");
                assert!(
                    detail.starts_with(&format!("docID=0, startPointer={}", start)),
                    "{}",
                    detail
                );
            }
            other => panic!("expected corruption, got {:?}", other),
        }
        // Other chunks are still readable
        assert_eq!(
            reader.document(5).unwrap().get("body"),
            Some(&FieldValue::from("document05"))
        );
    }

    #[test]
    fn frame_past_end_of_file() {
        let seg = write(16, CompressionMode::fast(), &text_docs(2)[..]);
        let start = open(&seg).unwrap().index.start_pointer(0) as usize;

        // docBase, chunkDocs, fieldCounts, lengths (all equal), then the frame header
        let mut data = seg.dir.read_file("_0.fdt").unwrap();
        assert_eq!(&data[start..start + 6], &[0, 2, 0, 1, 0, 12]);
        data[start + 7..start + 12].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        seg.dir.write_file("_0.fdt", data).unwrap();

        let err = open(&seg).unwrap().document(1).unwrap_err();
        assert!(
            matches!(
                err,
                Error::FailDecompress {
                    source: CompressionError::Parsing(_),
                    ..
                }
            ),
            "got {:?}",
            err
        );
    }

    #[test]
    fn bad_checksums() {
        let seg = write(16, CompressionMode::fast(), &text_docs(6)[..]);

        let mut data = seg.dir.read_file("_0.fdt").unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0x40;
        seg.dir.write_file("_0.fdt", data).unwrap();
        // Only a full check reads the whole data file
        let reader = open(&seg).unwrap();
        let err = reader.check_integrity().unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }), "got {:?}", err);

        let mut index = seg.dir.read_file("_0.fdx").unwrap();
        let mid = index.len() / 2;
        index[mid] ^= 0x01;
        seg.dir.write_file("_0.fdx", index).unwrap();
        let err = open(&seg).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }), "got {:?}", err);
    }

    #[test]
    fn wrong_doc_count() {
        let seg = write(16, CompressionMode::fast(), &text_docs(3)[..]);
        let err = seg
            .format
            .fields_reader(&seg.shared, &SegmentInfo::new("_0", 4), seg.infos.clone())
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn wrong_format_name() {
        let seg = write(16, CompressionMode::fast(), &text_docs(3)[..]);
        let err = ChunkedFieldReader::open(
            &seg.dir,
            &SegmentInfo::new("_0", 3),
            "",
            seg.infos.clone(),
            "Other",
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadHeader { .. }), "got {:?}", err);
    }

    #[test]
    fn unknown_field() {
        let seg = write(16, CompressionMode::fast(), &text_docs(3)[..]);
        let reader = seg
            .format
            .fields_reader(&seg.shared, &SegmentInfo::new("_0", 3), Arc::new(FieldInfos::new()));
        let err = reader.unwrap().document(0).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }), "got {:?}", err);
    }

    #[test]
    #[should_panic(expected = "docID out of range")]
    fn doc_out_of_range() {
        let seg = write(16, CompressionMode::fast(), &text_docs(3)[..]);
        let _ = open(&seg).unwrap().document(3);
    }

    #[test]
    fn clones_across_threads() {
        let seg = write(32, CompressionMode::fast(), &text_docs(50)[..]);
        let reader = open(&seg).unwrap();
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let mut reader = reader.clone();
                s.spawn(move || {
                    for i in (0..50).rev().filter(|i| i % 4 == t) {
                        let doc = reader.document(i).unwrap();
                        assert_eq!(
                            doc.get("body"),
                            Some(&FieldValue::String(format!("document{:02}", i)))
                        );
                    }
                });
            }
        });
        assert_eq!(reader.decompressed_bytes(), 0);
    }
}
