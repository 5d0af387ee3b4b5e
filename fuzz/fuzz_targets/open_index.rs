#![no_main]
use libfuzzer_sys::fuzz_target;
use stored_fields::{ChunkIndexReader, DocId};

// Parse arbitrary bytes as the body of a chunk index, then look up every document it claims to
// hold. Neither step may panic.
fuzz_target!(|data: &[u8]| {
    if let Ok(index) = ChunkIndexReader::read(&mut &data[..], "fuzz") {
        for doc in 0..index.max_doc().min(1 << 16) as DocId {
            let pointer = index.start_pointer(doc);
            assert!(pointer < index.max_pointer());
        }
    }
});
