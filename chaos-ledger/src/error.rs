//! Error types for the ledger and generation pipeline

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (snapshot file handling)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted snapshot could not be parsed and could not be moved aside
    #[error("Corrupt snapshot at {path:?}: {reason}")]
    CorruptSnapshot {
        /// Snapshot location
        path: PathBuf,
        /// Parse failure description
        reason: String,
    },

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Transaction id already committed
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(Uuid),

    /// A single remote entropy fetch failed
    #[error("Entropy source error: {0}")]
    Entropy(String),

    /// Concurrency error (blocking task panicked or was cancelled)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Entropy(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Concurrency(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
