//! Error types for the autorole node.

use fresnel_thz::LadderError;
use thiserror::Error;

/// Result type for autorole operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in autorole operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Threshold ladder rejected an edit (duplicate threshold, unknown role)
    #[error(transparent)]
    Ladder(#[from] LadderError),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Membership or role-mutation provider failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failures that the next tick will retry on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::Storage(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
