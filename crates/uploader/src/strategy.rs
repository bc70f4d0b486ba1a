//! Transfer strategies.
//!
//! Every item is routed to exactly one strategy at admission time:
//! the resumable session protocol for on-disk files when the endpoint
//! supports it, a manual chunk fallback otherwise, and a single direct
//! request for directory markers and empty payloads. Selection is a pure
//! function of the endpoint capabilities and the item; it never changes
//! mid-transfer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skylift_transfer::{
    ByteSource, ChunkSource, LARGE_CHUNK_SIZE, Retryable, RetrySchedule, UploadItem, chunk_count,
    chunk_size_for, fingerprint, with_backoff,
};

use crate::endpoint::{Capabilities, EndpointFuture, StorageEndpoint, WireChunk};
use crate::error::UploadError;
use crate::types::ProgressSink;

/// Attempts per chunk in the fallback strategy, first try included.
///
/// The fallback retries immediately without backoff; each chunk is an
/// independent request and a persistent failure should surface fast.
const CHUNK_ATTEMPTS: usize = 3;

/// Which transfer path an item takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Resumable session protocol with offset probing.
    Resumable,
    /// Manual chunk posts keyed by content fingerprint.
    Fallback,
    /// One request, no chunking.
    Direct,
}

/// Picks the transfer path for an item.
///
/// Directory markers and empty payloads need no chunking machinery. The
/// resumable protocol applies only to on-disk files (in-memory buffers
/// cannot outlive a restart, so resume buys nothing) and only when the
/// origin allows it.
pub fn select_strategy(caps: Capabilities, item: &UploadItem) -> StrategyKind {
    if item.source.is_dir() || item.source.is_empty() {
        return StrategyKind::Direct;
    }
    let on_disk = matches!(item.source, ByteSource::File { .. });
    if caps.resumable && !caps.restricted_origin && on_disk {
        return StrategyKind::Resumable;
    }
    StrategyKind::Fallback
}

/// A way of moving one item's bytes to the endpoint.
///
/// Implementations report cumulative progress through the sink and map
/// cancellation to [`UploadError::Aborted`].
pub trait TransferStrategy: Send + Sync {
    fn start<'a>(
        &'a self,
        item: &'a UploadItem,
        progress: &'a ProgressSink,
    ) -> EndpointFuture<'a, ()>;
}

/// Instantiates the strategy for `kind`.
pub(crate) fn build_strategy(
    kind: StrategyKind,
    endpoint: Arc<dyn StorageEndpoint>,
    delays: Arc<[Duration]>,
    cancel: CancellationToken,
) -> Box<dyn TransferStrategy> {
    match kind {
        StrategyKind::Resumable => Box::new(ResumableChunkedStrategy {
            endpoint,
            delays,
            cancel,
        }),
        StrategyKind::Fallback => Box::new(FallbackChunkedStrategy { endpoint, cancel }),
        StrategyKind::Direct => Box::new(DirectPutStrategy { endpoint, cancel }),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        Err(UploadError::Aborted)
    } else {
        Ok(())
    }
}

/// Resumable session protocol.
///
/// Opens a session (with backoff on transient failures), then appends
/// fixed-size chunks. After a failed append the server is probed for its
/// acknowledged offset and the local reader seeks there, so bytes the
/// server kept are never resent. Retries use the precomputed delay
/// schedule; the budget is per chunk, not per item.
pub struct ResumableChunkedStrategy {
    endpoint: Arc<dyn StorageEndpoint>,
    delays: Arc<[Duration]>,
    cancel: CancellationToken,
}

impl TransferStrategy for ResumableChunkedStrategy {
    fn start<'a>(
        &'a self,
        item: &'a UploadItem,
        progress: &'a ProgressSink,
    ) -> EndpointFuture<'a, ()> {
        Box::pin(async move {
            let total = item.source.len();
            let endpoint = &*self.endpoint;
            let session = with_backoff(&self.delays, || {
                endpoint.create_session(&item.path, item.overwrite, total)
            })
            .await?;
            debug!(id = item.id, path = %item.path, session = %session, "resumable session opened");

            let mut source = ChunkSource::open(&item.source, LARGE_CHUNK_SIZE)?;
            'chunks: loop {
                if self.cancel.is_cancelled() {
                    let _ = self.endpoint.abort_session(&session).await;
                    return Err(UploadError::Aborted);
                }
                let Some(chunk) = source.next_chunk()? else {
                    break;
                };
                let mut schedule = RetrySchedule::new(&self.delays);
                loop {
                    match self.endpoint.append(&session, chunk.offset, &chunk.data).await {
                        Ok(acked) => {
                            if acked != source.offset() {
                                // Partial ack; rewind to what the server kept.
                                source.seek_to(acked)?;
                            }
                            progress.report(acked);
                            continue 'chunks;
                        }
                        Err(err) if err.is_retryable() => {
                            let Some(delay) = schedule.next_delay() else {
                                return Err(err);
                            };
                            warn!(
                                id = item.id,
                                offset = chunk.offset,
                                retries = schedule.retries_used(),
                                "append failed, retrying: {err}"
                            );
                            tokio::time::sleep(delay).await;
                            if self.cancel.is_cancelled() {
                                let _ = self.endpoint.abort_session(&session).await;
                                return Err(UploadError::Aborted);
                            }
                            match self.endpoint.probe_offset(&session).await {
                                Ok(acked) if acked != chunk.offset => {
                                    // The server kept some of this chunk
                                    // before the connection dropped.
                                    source.seek_to(acked)?;
                                    progress.report(acked);
                                    continue 'chunks;
                                }
                                Ok(_) => {}
                                Err(probe_err) if probe_err.is_retryable() => {
                                    // Right after a drop the offset query
                                    // usually fails too; it shares the
                                    // chunk's retry budget instead of
                                    // failing the item.
                                }
                                Err(probe_err) => return Err(probe_err),
                            }
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            progress.report(total);
            Ok(())
        })
    }
}

/// Manual chunk fallback.
///
/// Splits the payload by the size tier, fingerprints it once so the
/// server can correlate chunks across requests, and posts chunks with
/// 1-based indices. Each chunk gets a few immediate retries on transient
/// failures.
pub struct FallbackChunkedStrategy {
    endpoint: Arc<dyn StorageEndpoint>,
    cancel: CancellationToken,
}

impl TransferStrategy for FallbackChunkedStrategy {
    fn start<'a>(
        &'a self,
        item: &'a UploadItem,
        progress: &'a ProgressSink,
    ) -> EndpointFuture<'a, ()> {
        Box::pin(async move {
            let total = item.source.len();
            let chunk_size = chunk_size_for(total);
            let total_chunks = chunk_count(total, chunk_size) as u32;
            let file_id = fingerprint(&item.source, chunk_size)?;
            debug!(
                id = item.id,
                path = %item.path,
                chunks = total_chunks,
                file_id = %file_id,
                "chunked fallback upload"
            );

            let mut source = ChunkSource::open(&item.source, chunk_size)?;
            let mut sent = 0u64;
            while let Some(chunk) = source.next_chunk()? {
                check_cancelled(&self.cancel)?;
                let wire = WireChunk {
                    file_id: &file_id,
                    index: (chunk.index + 1) as u32,
                    total: total_chunks,
                    data: &chunk.data,
                };
                let mut attempts = 0;
                loop {
                    attempts += 1;
                    match self.endpoint.post_chunk(&item.path, item.overwrite, wire).await {
                        Ok(()) => break,
                        Err(err) if err.is_retryable() && attempts < CHUNK_ATTEMPTS => {
                            warn!(
                                id = item.id,
                                index = wire.index,
                                attempts,
                                "chunk failed, retrying: {err}"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }
                sent += chunk.data.len() as u64;
                progress.report(sent);
            }
            Ok(())
        })
    }
}

/// Single-request path for directory markers and empty or in-memory
/// payloads that reached it.
pub struct DirectPutStrategy {
    endpoint: Arc<dyn StorageEndpoint>,
    cancel: CancellationToken,
}

impl TransferStrategy for DirectPutStrategy {
    fn start<'a>(
        &'a self,
        item: &'a UploadItem,
        progress: &'a ProgressSink,
    ) -> EndpointFuture<'a, ()> {
        Box::pin(async move {
            check_cancelled(&self.cancel)?;
            match &item.source {
                ByteSource::Directory => self.endpoint.create_dir(&item.path).await?,
                ByteSource::Buffer(data) => {
                    self.endpoint
                        .put_file(&item.path, item.overwrite, data)
                        .await?;
                    progress.report(data.len() as u64);
                }
                // Only zero-length files route here; content-bearing
                // files take a chunked strategy. The payload is never
                // read from disk.
                ByteSource::File { .. } => {
                    self.endpoint
                        .put_file(&item.path, item.overwrite, &[])
                        .await?;
                }
            }
            Ok(())
        })
    }
}
