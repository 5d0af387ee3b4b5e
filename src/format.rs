//! The stored fields format: constants, configuration, and the entry point that opens writers
//! and readers for a segment.
//!
//! Each segment gets two files. The data file (`.fdt`) holds a header, the chunk size, the
//! packed-ints version and the compression type, then every chunk, then chunk statistics and a
//! footer. The index file (`.fdx`) holds a header, the packed-ints version, the chunk index
//! blocks ended by an empty block, the data file's end pointer, the document count and a
//! footer.

use crate::compress::CompressionMode;
use crate::error::Result;
use crate::field::FieldInfos;
use crate::reader::ChunkedFieldReader;
use crate::store::Directory;
use crate::writer::ChunkedFieldWriter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hard limit on the number of documents in one chunk.
pub const MAX_DOCUMENTS_PER_CHUNK: usize = 128;
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 14;
/// Chunks per index block.
pub const DEFAULT_INDEX_BLOCK_SIZE: usize = 1024;

/// Extension of the stored fields data file.
pub const FIELDS_EXTENSION: &str = "fdt";
/// Extension of the stored fields index file.
pub const FIELDS_INDEX_EXTENSION: &str = "fdx";

pub const CODEC_SFX_IDX: &str = "Index";
pub const CODEC_SFX_DAT: &str = "Data";
pub const DEFAULT_FORMAT_NAME: &str = "StoredFields";

pub const VERSION_START: u32 = 0;
pub const VERSION_CHUNK_STATS: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_CHUNK_STATS;

/// Bits of a field key holding the type tag.
pub const TYPE_BITS: u32 = 3;
pub const TYPE_MASK: u64 = (1 << TYPE_BITS) - 1;

/// Tunables for writing a segment's stored fields. Readers take everything they need from the
/// files themselves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoredFieldsConfig {
    /// Minimum number of buffered bytes that triggers a chunk flush.
    pub chunk_size: usize,
    pub compression: CompressionMode,
    pub index_block_size: usize,
}

impl Default for StoredFieldsConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: CompressionMode::default(),
            index_block_size: DEFAULT_INDEX_BLOCK_SIZE,
        }
    }
}

impl StoredFieldsConfig {
    pub(crate) fn validate(&self) {
        assert!(
            self.chunk_size >= 1 && self.chunk_size <= (i32::MAX as usize) / 2,
            "chunk_size must be in 1..=2^30, got {}",
            self.chunk_size
        );
        assert!(
            self.index_block_size >= 1,
            "index_block_size must be at least 1"
        );
    }
}

/// What the stored fields layer needs to know about a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    pub name: String,
    pub max_doc: u32,
}

impl SegmentInfo {
    pub fn new(name: impl Into<String>, max_doc: u32) -> Self {
        Self {
            name: name.into(),
            max_doc,
        }
    }
}

/// Opens stored fields writers and readers.
#[derive(Clone, Debug)]
pub struct StoredFieldsFormat {
    format_name: String,
    segment_suffix: String,
    config: StoredFieldsConfig,
}

impl StoredFieldsFormat {
    pub fn new(format_name: &str, segment_suffix: &str, config: StoredFieldsConfig) -> Self {
        config.validate();
        Self {
            format_name: format_name.to_string(),
            segment_suffix: segment_suffix.to_string(),
            config,
        }
    }

    pub fn config(&self) -> &StoredFieldsConfig {
        &self.config
    }

    pub fn fields_writer(
        &self,
        directory: &Arc<dyn Directory>,
        segment: &str,
    ) -> Result<ChunkedFieldWriter> {
        ChunkedFieldWriter::new(
            directory.clone(),
            segment,
            &self.segment_suffix,
            &self.format_name,
            &self.config,
        )
    }

    pub fn fields_reader(
        &self,
        directory: &Arc<dyn Directory>,
        segment: &SegmentInfo,
        field_infos: Arc<FieldInfos>,
    ) -> Result<ChunkedFieldReader> {
        ChunkedFieldReader::open(
            directory.as_ref(),
            segment,
            &self.segment_suffix,
            field_infos,
            &self.format_name,
        )
    }
}

impl Default for StoredFieldsFormat {
    fn default() -> Self {
        Self::new(DEFAULT_FORMAT_NAME, "", StoredFieldsConfig::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_from_json() {
        let config: StoredFieldsConfig =
            serde_json::from_str(r#"{ "chunk_size": 4096, "compression": "None" }"#).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.compression, CompressionMode::None);
        assert_eq!(config.index_block_size, DEFAULT_INDEX_BLOCK_SIZE);

        let config: StoredFieldsConfig =
            serde_json::from_str(r#"{ "compression": { "Zstd": { "level": 7 } } }"#).unwrap();
        assert_eq!(config.compression, CompressionMode::Zstd { level: 7 });
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);

        assert!(serde_json::from_str::<StoredFieldsConfig>(r#"{ "chunk_bytes": 1 }"#).is_err());
    }

    #[test]
    #[should_panic(expected = "chunk_size")]
    fn zero_chunk_size() {
        StoredFieldsFormat::new(
            DEFAULT_FORMAT_NAME,
            "",
            StoredFieldsConfig {
                chunk_size: 0,
                ..Default::default()
            },
        );
    }

    #[test]
    fn type_mask_covers_tags() {
        assert_eq!(TYPE_MASK, 7);
    }
}
