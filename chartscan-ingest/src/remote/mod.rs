//! Remote store access
//!
//! The ingest core talks to the remote store only through [`RemoteStore`].
//! Implementations are expected to funnel every call through a
//! [`CallLimiter`] and retry transient failures per [`RetryPolicy`].

pub mod drive;
pub mod limiter;
pub mod retry;

pub use drive::{DriveAuth, DriveClient};
pub use limiter::CallLimiter;
pub use retry::{retry_with_backoff, RetryPolicy, Transient};

use crate::model::RemoteNode;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Streamed file content
pub type ByteStream = BoxStream<'static, Result<Bytes, RemoteError>>;

/// Remote store errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    Parse(String),
}

impl RemoteError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::RateLimited(_) => true,
            RemoteError::Status { status, .. } => *status >= 500,
            RemoteError::Auth(_) | RemoteError::NotFound(_) | RemoteError::Parse(_) => false,
        }
    }
}

/// The three operations the ingest core needs from a remote store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All children of a folder, every page
    async fn list_children(&self, node_id: &str) -> Result<Vec<RemoteNode>, RemoteError>;

    async fn get_node(&self, node_id: &str) -> Result<RemoteNode, RemoteError>;

    /// Opens one content stream without retrying; callers own the restart policy
    async fn open_download_stream(&self, node_id: &str) -> Result<ByteStream, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::RateLimited("userRateLimitExceeded".into()).is_transient());
        assert!(RemoteError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!RemoteError::Status {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!RemoteError::Auth("invalid key".into()).is_transient());
        assert!(!RemoteError::NotFound("abc".into()).is_transient());
    }
}
