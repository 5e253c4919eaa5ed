/*!
 * Chunker: splits a file into an ordered sequence of chunk descriptors.
 */

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::model::ChunkDescriptor;

/// Split a file into `ceil(file_size / chunk_size)` chunk descriptors.
///
/// Chunk `k` covers `[k * chunk_size, min((k+1) * chunk_size, file_size))`.
/// A zero-byte file produces an empty sequence — the Controller still runs
/// the session through to merge with zero chunks (see DESIGN.md for the
/// recorded Open Question decision); callers that want to reject empty
/// files do so before calling `chunk_file`.
///
/// Each descriptor holds a shared handle to the already-open file and a
/// byte range; no chunk bytes are read or copied here.
pub fn chunk_file(path: &Path, chunk_size: u64) -> std::io::Result<Vec<ChunkDescriptor>> {
    assert!(chunk_size > 0, "chunk_size must be positive");

    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let source = Arc::new(file);

    Ok(chunk_descriptors(source, file_size, chunk_size))
}

/// Build chunk descriptors for a file of `file_size` bytes already open as
/// `source`. Split out from [`chunk_file`] so tests can drive it with an
/// in-memory-backed temp file instead of touching real paths.
pub fn chunk_descriptors(
    source: Arc<File>,
    file_size: u64,
    chunk_size: u64,
) -> Vec<ChunkDescriptor> {
    if file_size == 0 {
        return Vec::new();
    }

    let chunk_count = file_size.div_ceil(chunk_size);
    let mut chunks = Vec::with_capacity(chunk_count as usize);

    for index in 0..chunk_count {
        let start = index * chunk_size;
        let end = std::cmp::min(start + chunk_size, file_size);
        chunks.push(ChunkDescriptor {
            index,
            start,
            end,
            source: source.clone(),
            hash: None,
        });
    }

    chunks
}

/// Number of chunks a file of `file_size` bytes splits into at `chunk_size`.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    if file_size == 0 {
        0
    } else {
        file_size.div_ceil(chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file_of_size(bytes: &[u8]) -> (tempfile::NamedTempFile, Arc<File>) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        let handle = Arc::new(tmp.reopen().unwrap());
        (tmp, handle)
    }

    #[test]
    fn eleven_byte_file_with_chunk_size_five_splits_into_three_chunks() {
        let (_tmp, handle) = temp_file_of_size(b"testcontent");
        let chunks = chunk_descriptors(handle, 11, 5);

        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 5));
        assert_eq!((chunks[1].start, chunks[1].end), (5, 10));
        assert_eq!((chunks[2].start, chunks[2].end), (10, 11));
    }

    #[test]
    fn chunks_are_contiguous_and_cover_the_whole_file() {
        let (_tmp, handle) = temp_file_of_size(&vec![7u8; 23]);
        let chunks = chunk_descriptors(handle, 23, 7);

        let mut expected_start = 0;
        let mut total = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u64);
            assert_eq!(chunk.start, expected_start);
            expected_start = chunk.end;
            total += chunk.size();
        }
        assert_eq!(expected_start, 23);
        assert_eq!(total, 23);
    }

    #[test]
    fn only_the_last_chunk_may_be_short() {
        let (_tmp, handle) = temp_file_of_size(&vec![1u8; 17]);
        let chunks = chunk_descriptors(handle, 17, 5);

        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.size(), 5);
        }
        assert_eq!(chunks.last().unwrap().size(), 2);
    }

    #[test]
    fn exact_multiple_has_no_short_chunk() {
        let (_tmp, handle) = temp_file_of_size(&vec![1u8; 15]);
        let chunks = chunk_descriptors(handle, 15, 5);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.size() == 5));
    }

    #[test]
    fn empty_file_produces_no_chunks() {
        let (_tmp, handle) = temp_file_of_size(b"");
        let chunks = chunk_descriptors(handle, 0, 5);
        assert!(chunks.is_empty());
    }

    #[test]
    fn hash_slot_starts_empty() {
        let (_tmp, handle) = temp_file_of_size(b"abc");
        let chunks = chunk_descriptors(handle, 3, 5);
        assert!(chunks[0].hash.is_none());
    }

    #[test]
    fn chunk_count_matches_descriptor_count() {
        assert_eq!(chunk_count(11, 5), 3);
        assert_eq!(chunk_count(15, 5), 3);
        assert_eq!(chunk_count(0, 5), 0);
        assert_eq!(chunk_count(1, 5), 1);
    }
}
