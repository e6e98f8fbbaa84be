use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default chunk size in bytes when the gateway config does not override it.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// One fragment of an uploaded file as recorded in the catalog.
///
/// `sequence` is the 0-based position of the fragment within the file. The
/// chunk key is derived from the upload context, not from the fragment bytes,
/// so a delete followed by a re-upload of the same path reuses the same keys
/// and overwrites the blobs in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub shard_id: usize,
    pub chunk_key: String,
    pub size: u64,
    pub sequence: u32,
}

/// Compute the chunk key for `(owner, path, sequence)`.
pub fn chunk_key(owner: &str, path: &str, sequence: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-{}-{}", owner, path, sequence).as_bytes());
    hex::encode(hasher.finalize())
}

/// Split `data` into fixed-size fragments; the last one may be shorter.
///
/// The returned slices share the underlying buffer, no bytes are copied.
pub fn split_into_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    let count = chunk_count(data.len() as u64, chunk_size);
    (0..count)
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(data.len());
            data.slice(start..end)
        })
        .collect()
}

/// Number of chunks a file of `size` bytes splits into.
pub fn chunk_count(size: u64, chunk_size: usize) -> usize {
    if size == 0 {
        0
    } else {
        ((size + chunk_size as u64 - 1) / chunk_size as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_is_stable_and_context_bound() {
        let key = chunk_key("alice", "/docs/report.txt", 0);
        assert_eq!(key.len(), 64);
        assert_eq!(key, chunk_key("alice", "/docs/report.txt", 0));
        assert_ne!(key, chunk_key("alice", "/docs/report.txt", 1));
        assert_ne!(key, chunk_key("bob", "/docs/report.txt", 0));
        assert_ne!(key, chunk_key("alice", "/docs/other.txt", 0));
    }

    #[test]
    fn test_chunk_key_ignores_content() {
        // Identity-derived keys: the same context always maps to the same key
        // no matter what bytes end up stored under it.
        assert_eq!(
            chunk_key("alice", "/a", 3),
            chunk_key("alice", "/a", 3)
        );
    }

    #[test]
    fn test_split_last_chunk_short() {
        let data = Bytes::from(vec![7u8; 2500]);
        let chunks = split_into_chunks(&data, 1024);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[test]
    fn test_split_exact_multiple() {
        let data = Bytes::from(vec![0u8; 2048]);
        let chunks = split_into_chunks(&data, 1024);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 1024));
    }

    #[test]
    fn test_split_empty() {
        let data = Bytes::new();
        assert!(split_into_chunks(&data, 1024).is_empty());
        assert_eq!(chunk_count(0, 1024), 0);
    }
}
