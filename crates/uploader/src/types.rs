//! Data types for the upload pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use skylift_transfer::ByteSource;

/// A caller-submitted unit of work, before the coordinator assigns an id.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Destination path; `/`-terminated for directory markers.
    pub path: String,
    pub source: ByteSource,
    /// Replace an existing destination instead of failing with a conflict.
    pub overwrite: bool,
}

impl UploadRequest {
    /// Convenience constructor for a file on disk.
    pub fn file(path: impl Into<String>, local: impl Into<std::path::PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            source: ByteSource::File {
                path: local.into(),
                size,
            },
            overwrite: false,
        }
    }

    /// Convenience constructor for a directory marker.
    pub fn directory(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self {
            path,
            source: ByteSource::Directory,
            overwrite: false,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Ceiling on simultaneously transferring items. Bounds both outbound
    /// sockets and client memory held for in-flight chunks.
    pub concurrency_limit: usize,
    /// Retry budget per retryable operation; zero disables retries.
    pub retry_count: usize,
    /// First non-zero backoff delay.
    pub retry_base_delay: Duration,
    /// Backoff ceiling.
    pub retry_max_delay: Duration,
    /// Speed sampling interval.
    pub sample_interval: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            retry_count: 5,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(20),
            sample_interval: Duration::from_secs(1),
        }
    }
}

/// Event emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// First submission into an idle pipeline. The host should arm its
    /// unsaved-work guard and show a loading state.
    BatchStarted,
    /// An item left the queue and entered the active set.
    ItemStarted { id: u64, path: String },
    ItemCompleted { id: u64, path: String },
    ItemFailed { id: u64, path: String, error: String },
    /// Queue and active set drained; emitted exactly once per batch. The
    /// host should drop its guard and refresh the listing.
    BatchCompleted {
        completed: usize,
        failed: usize,
        first_error: Option<String>,
    },
}

/// Byte-progress update flowing from a strategy to the aggregator, keyed
/// by item id.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub id: u64,
    /// Cumulative bytes delivered for the item.
    pub bytes: u64,
}

/// Per-item handle a strategy uses to report cumulative progress.
#[derive(Clone)]
pub struct ProgressSink {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSink {
    pub(crate) fn new(id: u64, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self { id, tx }
    }

    /// Reports cumulative bytes uploaded for the item. A closed receiver
    /// is fine — the batch was already reset.
    pub fn report(&self, bytes: u64) {
        let _ = self.tx.send(ProgressUpdate {
            id: self.id,
            bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_behavior() {
        let config = UploaderConfig::default();
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.retry_max_delay, Duration::from_secs(20));
        assert_eq!(config.sample_interval, Duration::from_secs(1));
    }

    #[test]
    fn directory_request_gets_trailing_slash() {
        let req = UploadRequest::directory("/photos/2024");
        assert_eq!(req.path, "/photos/2024/");
        assert!(req.source.is_dir());

        let req = UploadRequest::directory("/photos/2024/");
        assert_eq!(req.path, "/photos/2024/");
    }

    #[test]
    fn file_request_carries_size() {
        let req = UploadRequest::file("/docs/a.bin", "/tmp/a.bin", 123);
        assert_eq!(req.source.len(), 123);
        assert!(!req.overwrite);
    }
}
