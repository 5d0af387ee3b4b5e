//! In-memory chunk index, loaded whole when a reader opens.

use crate::error::{Error, Result};
use crate::packed::{byte_count, check_version, PackedArray};
use crate::varint::{zigzag_decode, ReadVarExt};
use crate::DocId;
use std::sync::Arc;

/// One index block: a run of chunks sharing a linear prediction of their doc bases and start
/// pointers.
#[derive(Clone, Debug)]
struct IndexBlock {
    doc_base: u32,
    start_pointer: u64,
    avg_chunk_docs: u32,
    avg_chunk_size: u64,
    doc_base_deltas: PackedArray,
    start_pointer_deltas: PackedArray,
}

impl IndexBlock {
    fn num_chunks(&self) -> usize {
        self.doc_base_deltas.len()
    }

    fn relative_doc_base(&self, chunk: usize) -> i64 {
        let expected = (self.avg_chunk_docs as i64).wrapping_mul(chunk as i64);
        expected.wrapping_add(zigzag_decode(self.doc_base_deltas.get(chunk)))
    }

    fn relative_start_pointer(&self, chunk: usize) -> i64 {
        let expected = (self.avg_chunk_size as i64).wrapping_mul(chunk as i64);
        expected.wrapping_add(zigzag_decode(self.start_pointer_deltas.get(chunk)))
    }
}

/// Index of the largest `i` in `0..len` for which `le(i)` holds, given that `le` holds for a
/// prefix of the range.
fn predecessor(len: usize, le: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0usize, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if le(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo.saturating_sub(1)
}

/// Maps document IDs to the start of the chunk holding them. Clones share the loaded blocks.
#[derive(Clone, Debug)]
pub struct ChunkIndexReader {
    max_doc: u32,
    max_pointer: u64,
    num_chunks: u64,
    blocks: Arc<[IndexBlock]>,
}

impl ChunkIndexReader {
    /// Parse the index file's content, starting just after its header and ending before its
    /// footer.
    pub fn read(input: &mut &[u8], resource: &str) -> Result<Self> {
        Self::parse(input, resource).map_err(|err| match err {
            Error::Io(err) => Error::decoding(err, resource, "chunk index"),
            err => err,
        })
    }

    fn parse(input: &mut &[u8], resource: &str) -> Result<Self> {
        let packed_version = input.read_vint()?;
        check_version(packed_version, resource)?;

        let mut blocks: Vec<IndexBlock> = Vec::new();
        let mut num_chunks = 0u64;
        // Smallest doc base and start pointer the next chunk may have
        let mut next_doc = 0i64;
        let mut next_pointer = 0i64;
        loop {
            let chunks = input.read_vint()? as usize;
            if chunks == 0 {
                break;
            }

            let doc_base = input.read_vint()?;
            let avg_chunk_docs = input.read_vint()?;
            let bits_per_doc_base = input.read_vint()?;
            if bits_per_doc_base == 0 || bits_per_doc_base > 32 {
                return Err(Error::corrupt(
                    resource,
                    format!("bitsPerDocBase={}", bits_per_doc_base),
                ));
            }
            let doc_base_deltas =
                read_packed(input, packed_version, chunks, bits_per_doc_base, resource)?;

            let start_pointer = input.read_vlong()?;
            let avg_chunk_size = input.read_vlong()?;
            let bits_per_start_pointer = input.read_vint()?;
            if bits_per_start_pointer == 0 || bits_per_start_pointer > 64 {
                return Err(Error::corrupt(
                    resource,
                    format!("bitsPerStartPointer={}", bits_per_start_pointer),
                ));
            }
            let start_pointer_deltas =
                read_packed(input, packed_version, chunks, bits_per_start_pointer, resource)?;

            let block = IndexBlock {
                doc_base,
                start_pointer,
                avg_chunk_docs,
                avg_chunk_size,
                doc_base_deltas,
                start_pointer_deltas,
            };

            // Every chunk must start after the previous one, in both documents and bytes
            if blocks.is_empty() && doc_base != 0 {
                return Err(Error::corrupt(
                    resource,
                    format!("first block starts at docBase={}", doc_base),
                ));
            }
            for i in 0..chunks {
                let doc = (doc_base as i64).wrapping_add(block.relative_doc_base(i));
                let pointer = (start_pointer as i64).wrapping_add(block.relative_start_pointer(i));
                if doc < next_doc || doc > u32::MAX as i64 || pointer < next_pointer {
                    return Err(Error::corrupt(
                        resource,
                        format!(
                            "chunk {} of block {} is out of order: docBase={}, startPointer={}",
                            i,
                            blocks.len(),
                            doc,
                            pointer
                        ),
                    ));
                }
                next_doc = doc + 1;
                next_pointer = pointer.saturating_add(1);
            }
            num_chunks += chunks as u64;
            blocks.push(block);
        }

        let max_pointer = input.read_vlong()?;
        let max_doc = input.read_vint()?;
        if (max_doc as i64) < next_doc
            || (blocks.is_empty() && max_doc != 0)
            || max_pointer > i64::MAX as u64
            || (max_pointer as i64) < next_pointer
        {
            return Err(Error::corrupt(
                resource,
                format!(
                    "index ends at numDocs={}, maxPointer={}, before its last chunk",
                    max_doc, max_pointer
                ),
            ));
        }
        if !input.is_empty() {
            return Err(Error::corrupt(
                resource,
                format!("{} unexpected trailing bytes", input.len()),
            ));
        }

        Ok(Self {
            max_doc,
            max_pointer,
            num_chunks,
            blocks: blocks.into(),
        })
    }

    /// Number of documents the index covers.
    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// End of the last chunk in the data file.
    pub fn max_pointer(&self) -> u64 {
        self.max_pointer
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_chunks(&self) -> u64 {
        self.num_chunks
    }

    fn block(&self, doc_id: DocId) -> usize {
        predecessor(self.blocks.len(), |b| self.blocks[b].doc_base <= doc_id)
    }

    /// Offset in the data file of the chunk holding `doc_id`.
    ///
    /// # Panics
    ///
    /// Panics if `doc_id` is not below [`max_doc`][Self::max_doc].
    pub fn start_pointer(&self, doc_id: DocId) -> u64 {
        assert!(
            doc_id < self.max_doc,
            "docID out of range [0-{}]: {}",
            self.max_doc,
            doc_id
        );
        let block = &self.blocks[self.block(doc_id)];
        let relative_doc = (doc_id - block.doc_base) as i64;
        let chunk = predecessor(block.num_chunks(), |i| {
            block.relative_doc_base(i) <= relative_doc
        });
        (block.start_pointer as i64).wrapping_add(block.relative_start_pointer(chunk)) as u64
    }
}

fn read_packed(
    input: &mut &[u8],
    version: u32,
    count: usize,
    bits: u32,
    resource: &str,
) -> Result<PackedArray> {
    if byte_count(count, bits) > input.len() {
        return Err(Error::corrupt(
            resource,
            format!("block of {} chunks runs past the end of the index", count),
        ));
    }
    Ok(PackedArray::read(input, version, count, bits)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec;
    use crate::index_writer::ChunkIndexWriter;
    use crate::store::{Directory, RamDirectory};
    use rand::Rng;

    /// Write an index for the given chunks and return its content between header and footer.
    fn index_bytes(block_size: usize, chunks: &[(u32, u64)], max_pointer: u64) -> Vec<u8> {
        let dir = RamDirectory::new();
        let out = dir.create_output("_0.fdx").unwrap();
        let mut w = ChunkIndexWriter::new(out, block_size).unwrap();
        let mut docs = 0;
        for &(n, p) in chunks {
            w.write_index(n, p).unwrap();
            docs += n;
        }
        w.finish(docs, max_pointer).unwrap();
        let bytes = dir.read_file("_0.fdx").unwrap();
        codec::check_footer(&bytes, "_0.fdx").unwrap().to_vec()
    }

    fn load(block_size: usize, chunks: &[(u32, u64)], max_pointer: u64) -> ChunkIndexReader {
        let bytes = index_bytes(block_size, chunks, max_pointer);
        ChunkIndexReader::read(&mut &bytes[..], "_0.fdx").unwrap()
    }

    #[test]
    fn predecessor_search() {
        let values = [0, 3, 3, 7, 10];
        assert_eq!(predecessor(values.len(), |i| values[i] <= 0), 0);
        assert_eq!(predecessor(values.len(), |i| values[i] <= 5), 2);
        assert_eq!(predecessor(values.len(), |i| values[i] <= 7), 3);
        assert_eq!(predecessor(values.len(), |i| values[i] <= 100), 4);
    }

    #[test]
    fn lookups() {
        let chunks = [(10, 30), (10, 130), (12, 235), (3, 330)];
        for block_size in [1, 2, 3, 1024] {
            let index = load(block_size, &chunks, 400);
            assert_eq!(index.max_doc(), 35);
            assert_eq!(index.max_pointer(), 400);
            assert_eq!(index.num_chunks(), 4);
            assert_eq!(index.num_blocks(), (4 + block_size - 1) / block_size);
            for doc in 0..35 {
                let expected = match doc {
                    0..=9 => 30,
                    10..=19 => 130,
                    20..=31 => 235,
                    _ => 330,
                };
                assert_eq!(index.start_pointer(doc), expected, "doc {}", doc);
            }
        }
    }

    #[test]
    fn random_chunks() {
        let mut rng = rand::thread_rng();
        for block_size in [1, 7, 64, 1024] {
            let mut chunks = Vec::new();
            let mut pointer = 25u64;
            for _ in 0..500 {
                let docs = if rng.gen_bool(0.1) { 128 } else { rng.gen_range(1..20) };
                chunks.push((docs, pointer));
                pointer += rng.gen_range(10..100_000);
            }
            let index = load(block_size, &chunks, pointer);
            let mut doc = 0u32;
            for &(n, p) in &chunks {
                assert_eq!(index.start_pointer(doc), p);
                assert_eq!(index.start_pointer(doc + n - 1), p);
                doc += n;
            }
            assert_eq!(index.max_doc(), doc);
        }
    }

    #[test]
    fn empty_index() {
        let index = load(16, &[], 50);
        assert_eq!(index.max_doc(), 0);
        assert_eq!(index.num_blocks(), 0);
    }

    #[test]
    #[should_panic(expected = "docID out of range")]
    fn out_of_range() {
        load(16, &[(4, 20)], 50).start_pointer(4);
    }

    #[test]
    fn clones_share_blocks() {
        let index = load(2, &[(4, 20), (4, 60), (4, 90)], 120);
        let other = index.clone();
        assert!(Arc::ptr_eq(&index.blocks, &other.blocks));
        assert_eq!(other.start_pointer(9), 90);
    }

    #[test]
    fn rejects_bad_widths() {
        let mut bytes = index_bytes(16, &[(4, 20), (6, 60)], 120);
        // packed version, numChunks, docBase, avgChunkDocs, then the doc base width
        assert_eq!(&bytes[..3], &[1, 2, 0]);
        bytes[4] = 33;
        let err = ChunkIndexReader::read(&mut &bytes[..], "_0.fdx").unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }), "got {:?}", err);
    }

    #[test]
    fn rejects_truncated() {
        let bytes = index_bytes(16, &[(4, 20), (6, 60)], 120);
        for len in 0..bytes.len() {
            let err = ChunkIndexReader::read(&mut &bytes[..len], "_0.fdx").unwrap_err();
            assert!(err.is_corruption(), "len {}: {:?}", len, err);
        }
    }

    #[test]
    fn rejects_overlong_varint() {
        let mut bytes = index_bytes(16, &[(4, 20)], 120);
        // The block's chunk count
        bytes[1..6].copy_from_slice(&[0xFF; 5]);
        let err = ChunkIndexReader::read(&mut &bytes[..], "_0.fdx").unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }), "got {:?}", err);
    }

    #[test]
    fn rejects_short_doc_count() {
        let mut bytes = index_bytes(16, &[(4, 20), (6, 60)], 120);
        // Claim fewer documents than the last chunk's doc base
        let last = bytes.len() - 1;
        assert_eq!(bytes[last], 10);
        bytes[last] = 3;
        let err = ChunkIndexReader::read(&mut &bytes[..], "_0.fdx").unwrap_err();
        assert!(err.is_corruption());
    }
}
