//! Error types for the statistics side.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while computing or publishing statistics.
#[derive(Error, Debug)]
pub enum Error {
    /// Store error.
    #[error(transparent)]
    Core(#[from] relaywatch_core::Error),

    /// Query error outside a store call.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Snapshot (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking store task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// An operation did not finish in time.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// Unknown time range name.
    #[error("unknown time range '{0}'")]
    UnknownRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::UnknownRange("1y".into()).to_string(),
            "unknown time range '1y'"
        );
        assert_eq!(Error::Timeout("cache insert").to_string(), "timed out: cache insert");
    }
}
