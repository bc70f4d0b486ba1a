use sha2::{Digest, Sha256};

use crate::chunked::ChunkSource;
use crate::types::ByteSource;
use crate::{FINGERPRINT_CHUNK_CAP, TransferError};

/// Computes a stable content identifier for a chunked upload session.
///
/// Hashes the total payload length plus at most [`FINGERPRINT_CHUNK_CAP`]
/// leading chunks, so the cost is `O(cap × chunk_size)` regardless of file
/// size. Two payloads that agree on the hashed prefix and the total length
/// share a fingerprint by construction; that is enough to tell repeated
/// chunk deliveries for one logical upload apart from unrelated concurrent
/// uploads.
pub fn fingerprint(source: &ByteSource, chunk_size: usize) -> Result<String, TransferError> {
    fingerprint_with_cap(source, chunk_size, FINGERPRINT_CHUNK_CAP)
}

/// [`fingerprint`] with an explicit leading-chunk cap.
pub fn fingerprint_with_cap(
    source: &ByteSource,
    chunk_size: usize,
    cap: usize,
) -> Result<String, TransferError> {
    let mut chunks = ChunkSource::open(source, chunk_size)?;
    let mut hasher = Sha256::new();
    hasher.update(source.len().to_le_bytes());

    let mut hashed = 0;
    while hashed < cap {
        match chunks.next_chunk()? {
            Some(chunk) => hasher.update(&chunk.data),
            None => break,
        }
        hashed += 1;
    }

    Ok(hex::encode(hasher.finalize()))
}
