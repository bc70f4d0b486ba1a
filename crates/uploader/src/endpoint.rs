//! Trait seam to the remote storage HTTP API.
//!
//! The pipeline consumes two server conventions — a resumable,
//! session-based upload endpoint and a conventional chunk/resource
//! endpoint — plus an auth provider that decorates every request. The
//! host application implements [`StorageEndpoint`] on top of its actual
//! HTTP client; the pipeline never builds requests itself. Using a trait
//! keeps transfer logic decoupled from transport and testable with mocks.
//!
//! Credential renewal is the implementation's concern: when the server
//! signals a token refresh the provider renews transparently, and the
//! pipeline never retries solely because of that signal.

use std::future::Future;
use std::pin::Pin;

use crate::error::UploadError;

/// Boxed future returned by endpoint methods.
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// What the runtime/origin pair supports.
///
/// Evaluated once per item at admission; strategy selection never changes
/// mid-transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// Server and client both speak the resumable session protocol.
    pub resumable: bool,
    /// Origin restrictions (e.g. a non-network scheme) forbid the
    /// resumable endpoint even when it is supported.
    pub restricted_origin: bool,
}

/// One chunk of a fallback upload on the wire.
///
/// Carries everything the server needs to assemble the file without a
/// stateful session handshake: the content fingerprint, the 1-based chunk
/// index and the total chunk count.
#[derive(Debug, Clone, Copy)]
pub struct WireChunk<'a> {
    /// Content fingerprint identifying the logical upload.
    pub file_id: &'a str,
    /// 1-based position of this chunk.
    pub index: u32,
    /// Total number of chunks in the payload.
    pub total: u32,
    pub data: &'a [u8],
}

/// Abstract client for the remote storage API.
///
/// Implementations map `Conflict` from HTTP 409, `Network` from transport
/// failures, and `Endpoint` from anything outside the contract.
pub trait StorageEndpoint: Send + Sync {
    /// Environment capabilities consulted by strategy selection.
    fn capabilities(&self) -> Capabilities;

    /// Creates a directory marker with a single zero-body request.
    fn create_dir(&self, path: &str) -> EndpointFuture<'_, ()>;

    /// Uploads a whole payload in one request.
    fn put_file(&self, path: &str, overwrite: bool, data: &[u8]) -> EndpointFuture<'_, ()>;

    /// Opens a resumable session; returns the session/location identifier.
    fn create_session(
        &self,
        path: &str,
        overwrite: bool,
        total_bytes: u64,
    ) -> EndpointFuture<'_, String>;

    /// Appends bytes at `offset` within a session; returns the new
    /// server-acknowledged offset.
    fn append(&self, session: &str, offset: u64, data: &[u8]) -> EndpointFuture<'_, u64>;

    /// Queries the server-acknowledged offset for a session — the resume
    /// point after a dropped connection.
    fn probe_offset(&self, session: &str) -> EndpointFuture<'_, u64>;

    /// Releases a resumable session after a user abort. Best-effort.
    fn abort_session(&self, session: &str) -> EndpointFuture<'_, ()>;

    /// Delivers one fallback chunk as an independent request.
    fn post_chunk(&self, path: &str, overwrite: bool, chunk: WireChunk<'_>)
    -> EndpointFuture<'_, ()>;
}
