//! Error types shared by the relaywatch crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating events or talking to the store.
#[derive(Error, Debug)]
pub enum Error {
    /// Event has a missing or malformed field.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// Relay URL could not be normalized.
    #[error("invalid relay URL '{url}': {reason}")]
    InvalidRelayUrl {
        /// The URL as supplied.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for building an [`Error::InvalidField`].
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
