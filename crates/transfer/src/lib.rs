//! Client-side building blocks for resumable uploads.
//!
//! Chunked payload reading with seek-based resume, bounded-prefix content
//! fingerprints, a precomputed retry/backoff policy and aggregate
//! progress/speed/ETA tracking across concurrently transferring items.

mod backoff;
mod chunked;
mod fingerprint;
mod progress;
mod types;
mod validation;

pub use backoff::{Retryable, RetrySchedule, retry_delays, with_backoff};
pub use chunked::{ChunkSource, chunk_count, chunk_size_for};
pub use fingerprint::fingerprint;
pub use progress::{AggregateSnapshot, ItemProgress, ProgressAggregator, format_bytes};
pub use types::{ByteSource, Chunk, UploadItem};
pub use validation::validate_destination;

/// Chunk size for payloads below [`CHUNK_TIER_THRESHOLD`]: 1 MiB.
pub const SMALL_CHUNK_SIZE: usize = 1024 * 1024;

/// Chunk size for larger payloads: 4 MiB.
///
/// Larger chunks reduce per-chunk overhead (hashing, ACK round-trips).
pub const LARGE_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Payload size at which the chunk size switches tiers: 64 MiB.
pub const CHUNK_TIER_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Maximum number of leading chunks hashed into a fingerprint.
///
/// Bounds hashing cost for very large files while still producing a
/// stable per-content identifier.
pub const FINGERPRINT_CHUNK_CAP: usize = 10;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("directory markers have no byte content")]
    DirectorySource,
}
