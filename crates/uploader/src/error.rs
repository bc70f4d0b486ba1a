//! Upload pipeline error types.

use skylift_transfer::{Retryable, TransferError};

/// Errors produced by the upload pipeline.
///
/// Every failure is scoped to a single item; there is no process-fatal
/// class. One item's error never halts its siblings.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Destination already exists and overwrite was not requested
    /// (HTTP 409). Retrying cannot succeed.
    #[error("destination conflict")]
    Conflict,

    /// User-initiated abort. Cleaned up silently, never surfaced as a
    /// batch error.
    #[error("upload aborted")]
    Aborted,

    /// Transient network or connection failure; retryable.
    #[error("connection error: {0}")]
    Network(String),

    /// The endpoint answered outside its contract (unexpected status,
    /// missing session id).
    #[error("endpoint error: {0}")]
    Endpoint(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for UploadError {
    /// Only transient connection failures consume the retry budget;
    /// conflicts, aborts, contract violations and local I/O problems
    /// fail the item immediately.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(UploadError::Network("reset".into()).is_retryable());
        assert!(!UploadError::Conflict.is_retryable());
        assert!(!UploadError::Aborted.is_retryable());
        assert!(!UploadError::Endpoint("bad status".into()).is_retryable());
    }
}
