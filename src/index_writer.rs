//! Writes the chunk index: for every chunk, its first document and its start offset in the data
//! file.
//!
//! Chunks are grouped into blocks. Within a block both sequences are stored as zigzag-encoded
//! deviations from a straight line through the block's first and last chunks, so they usually
//! pack into very few bits.

use crate::codec;
use crate::packed::{bits_required, PackedWriter, PACKED_VERSION_CURRENT};
use crate::store::IndexOutput;
use crate::varint::{zigzag_encode, WriteVarExt};
use std::io;

pub struct ChunkIndexWriter {
    out: Box<dyn IndexOutput>,
    block_size: usize,
    total_docs: u64,
    block_docs: u64,
    first_start_pointer: Option<u64>,
    max_start_pointer: u64,
    /// Document count of each chunk in the pending block.
    doc_base_deltas: Vec<u32>,
    /// Distance from each chunk's start pointer to the previous one's.
    start_pointer_deltas: Vec<u64>,
}

impl ChunkIndexWriter {
    /// Start writing the index after the file's header.
    pub fn new(mut out: Box<dyn IndexOutput>, block_size: usize) -> io::Result<Self> {
        assert!(block_size >= 1, "index block size must be at least 1");
        out.write_vint(PACKED_VERSION_CURRENT)?;
        Ok(Self {
            out,
            block_size,
            total_docs: 0,
            block_docs: 0,
            first_start_pointer: None,
            max_start_pointer: 0,
            doc_base_deltas: Vec::with_capacity(block_size),
            start_pointer_deltas: Vec::with_capacity(block_size),
        })
    }

    fn reset(&mut self) {
        self.block_docs = 0;
        self.first_start_pointer = None;
        self.doc_base_deltas.clear();
        self.start_pointer_deltas.clear();
    }

    fn write_block(&mut self) -> io::Result<()> {
        let block_chunks = self.doc_base_deltas.len();
        debug_assert!(block_chunks > 0);
        let first_start_pointer = self.first_start_pointer.unwrap_or(self.max_start_pointer);
        self.out.write_vint(block_chunks as u32)?;

        // Doc bases
        let avg_chunk_docs = if block_chunks == 1 {
            0
        } else {
            let last_chunk_docs = self.doc_base_deltas[block_chunks - 1] as u64;
            ((self.block_docs - last_chunk_docs) as f64 / (block_chunks - 1) as f64).round() as u64
        };
        self.out.write_vint((self.total_docs - self.block_docs) as u32)?;
        self.out.write_vint(avg_chunk_docs as u32)?;
        let doc_deltas: Vec<u64> = self
            .doc_base_deltas
            .iter()
            .scan(0i64, |doc_base, &chunk_docs| {
                let base = *doc_base;
                *doc_base += chunk_docs as i64;
                Some(base)
            })
            .enumerate()
            .map(|(i, base)| zigzag_encode(base - (avg_chunk_docs * i as u64) as i64))
            .collect();
        self.write_deltas(&doc_deltas)?;

        // Start pointers
        let avg_chunk_size = if block_chunks == 1 {
            0
        } else {
            (self.max_start_pointer - first_start_pointer) / (block_chunks as u64 - 1)
        };
        self.out.write_vlong(first_start_pointer)?;
        self.out.write_vlong(avg_chunk_size)?;
        let mut start_pointer = 0u64;
        let pointer_deltas: Vec<u64> = self
            .start_pointer_deltas
            .iter()
            .enumerate()
            .map(|(i, &delta)| {
                start_pointer += delta;
                zigzag_encode(start_pointer as i64 - (avg_chunk_size * i as u64) as i64)
            })
            .collect();
        self.write_deltas(&pointer_deltas)
    }

    fn write_deltas(&mut self, deltas: &[u64]) -> io::Result<()> {
        let max_delta = deltas.iter().fold(0u64, |acc, &d| acc | d);
        let bits = bits_required(max_delta);
        self.out.write_vint(bits)?;
        let mut w = PackedWriter::new(&mut self.out, deltas.len(), bits);
        for &d in deltas {
            w.add(d)?;
        }
        w.finish()
    }

    /// Record a chunk of `num_docs` documents starting at `start_pointer` in the data file.
    pub fn write_index(&mut self, num_docs: u32, start_pointer: u64) -> io::Result<()> {
        if self.doc_base_deltas.len() == self.block_size {
            self.write_block()?;
            self.reset();
        }

        let first = *self.first_start_pointer.get_or_insert(start_pointer);
        if self.doc_base_deltas.is_empty() {
            self.max_start_pointer = first;
        }
        debug_assert!(start_pointer >= self.max_start_pointer);
        self.doc_base_deltas.push(num_docs);
        self.start_pointer_deltas
            .push(start_pointer - self.max_start_pointer);
        self.block_docs += num_docs as u64;
        self.total_docs += num_docs as u64;
        self.max_start_pointer = start_pointer;
        Ok(())
    }

    /// Write the last block, the end marker, the data file's end pointer and document count, and
    /// the footer, then close the file.
    pub fn finish(mut self, num_docs: u32, max_pointer: u64) -> io::Result<()> {
        assert_eq!(
            self.total_docs, num_docs as u64,
            "Expected {} docs, but got {}",
            num_docs, self.total_docs
        );
        if !self.doc_base_deltas.is_empty() {
            self.write_block()?;
            self.reset();
        }
        self.out.write_vint(0)?;
        self.out.write_vlong(max_pointer)?;
        self.out.write_vint(num_docs)?;
        codec::write_footer(self.out.as_mut())?;
        self.out.close()
    }

    /// Close the file without completing it.
    pub fn close(self) -> io::Result<()> {
        self.out.close()
    }
}
