//! Growable buffers for the chunk being assembled by the writer.

use std::io::{self, Write};

/// Largest array length [`oversize`] will return.
const MAX_ARRAY_LENGTH: usize = i32::MAX as usize - 8;

/// Capacity to grow an array to so that it holds at least `min_target` elements.
///
/// Grows by an eighth (at least 3 elements) so repeated appends are amortized without tying up
/// much unused memory, then rounds up so the allocation in bytes is a multiple of 8.
pub fn oversize(min_target: usize, bytes_per_element: usize) -> usize {
    if min_target == 0 {
        return 0;
    }
    let extra = (min_target >> 3).max(3);
    let new_size = min_target + extra;
    if new_size + 7 > MAX_ARRAY_LENGTH {
        return MAX_ARRAY_LENGTH;
    }
    match bytes_per_element {
        1 => (new_size + 7) & !7,
        2 => (new_size + 3) & !3,
        4 => (new_size + 1) & !1,
        _ => new_size,
    }
}

/// Raw, uncompressed bytes of the documents buffered for the next chunk.
#[derive(Clone, Debug, Default)]
pub struct ChunkBuffer {
    bytes: Vec<u8>,
}

impl ChunkBuffer {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(oversize(chunk_size, 1)),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Empty the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

impl Write for ChunkBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let needed = self.bytes.len() + buf.len();
        if needed > self.bytes.capacity() {
            self.bytes.reserve_exact(oversize(needed, 1) - self.bytes.len());
        }
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn growth() {
        assert_eq!(oversize(0, 4), 0);
        assert_eq!(oversize(1, 4), 4);
        assert_eq!(oversize(16, 4), 20);
        assert_eq!(oversize(100, 4), 112);
        assert_eq!(oversize(1, 1), 8);
        assert_eq!(oversize(100, 1), 112);
        assert_eq!(oversize(100, 8), 112);
        assert_eq!(oversize(1, 2), 4);
        assert_eq!(oversize(MAX_ARRAY_LENGTH, 1), MAX_ARRAY_LENGTH);
        for n in 1..2000 {
            assert!(oversize(n, 4) > n);
        }
    }

    #[test]
    fn buffer() {
        let mut buf = ChunkBuffer::with_chunk_size(16);
        assert!(buf.is_empty());
        buf.write_all(b"0123456789").unwrap();
        buf.write_all(&[b'x'; 100]).unwrap();
        assert_eq!(buf.len(), 110);
        assert_eq!(&buf.as_slice()[..10], b"0123456789");
        let cap = buf.bytes.capacity();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.bytes.capacity(), cap);
    }
}
