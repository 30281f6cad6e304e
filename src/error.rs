//! Error types for the synchronization layer

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the sync client, the query cache and the REST layer.
///
/// Connectivity loss is not an error here: the transport task reports it
/// through lifecycle events and the reconnect policy.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration value could not be used
    #[error("configuration error: {0}")]
    Config(String),

    /// URL could not be parsed
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Handshake or socket-level failure
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection attempt did not finish in time
    #[error("connection attempt timed out after {0} ms")]
    Timeout(u64),

    /// Operation needs a live (or recoverable) connection
    #[error("not connected")]
    NotConnected,

    /// Connection reached a terminal state while waiting on it
    #[error("connection closed: {0}")]
    Disconnected(String),

    /// JSON encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// REST API answered with a failure envelope or status
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Query key was never registered with the cache
    #[error("unknown query: {0}")]
    UnknownQuery(String),

    /// Token could not be issued or validated
    #[error("auth error: {0}")]
    Auth(String),

    /// Filesystem failure (credential files, listeners)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether retrying the same operation later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Timeout(_) | SyncError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::Timeout(20_000).is_transient());
        assert!(!SyncError::NotConnected.is_transient());
        assert!(!SyncError::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_api_error_display() {
        let err = SyncError::Api {
            status: 404,
            message: "Content not found".to_string(),
        };
        assert_eq!(err.to_string(), "api error (404): Content not found");
    }
}
