//! Error types for the ingestion side.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting.
#[derive(Error, Debug)]
pub enum Error {
    /// Store, validation or normalization error.
    #[error(transparent)]
    Core(#[from] relaywatch_core::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An operation did not finish in time.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking store task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_is_transparent() {
        let err: Error = relaywatch_core::Error::invalid_field("kind", "missing").into();
        assert_eq!(err.to_string(), "invalid field 'kind': missing");
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(Error::Timeout("handshake").to_string(), "timed out: handshake");
    }
}
