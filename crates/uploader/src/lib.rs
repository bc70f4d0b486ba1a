//! Client-side resumable upload pipeline.
//!
//! Coordinates many simultaneous uploads against a remote storage API:
//! a FIFO queue with bounded-concurrency admission, per-item transfer
//! strategies (resumable protocol, manual-chunk fallback, single-request
//! direct put), retry with a precomputed backoff schedule, and a live
//! aggregate speed/ETA feed over the whole fleet.
//!
//! # Usage
//!
//! The host application implements [`StorageEndpoint`] on top of its
//! actual HTTP client and auth provider, submits [`UploadRequest`]s to an
//! [`UploadCoordinator`], and observes the batch through
//! [`UploadEvent`]s and [`UploadCoordinator::snapshot`].

pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod scanner;
pub mod strategy;
pub mod types;

// Re-export primary types for convenience.
pub use coordinator::UploadCoordinator;
pub use endpoint::{Capabilities, EndpointFuture, StorageEndpoint, WireChunk};
pub use error::UploadError;
pub use scanner::{check_conflict, scan_tree};
pub use strategy::{StrategyKind, TransferStrategy, select_strategy};
pub use types::{ProgressSink, UploadEvent, UploadRequest, UploaderConfig};
