//! Error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be read or written right now. Callers keep
    /// their pending deltas and retry later.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The database file exists but is not a usable database.
    #[error("database at {path} is corrupt or unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The target period was sealed and can no longer change.
    #[error("period {period} is sealed")]
    PeriodSealed { period: String },

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

/// Failures while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures of an input event source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The OS refused or dropped the input hook (missing permission,
    /// no display server, unsupported platform).
    #[error("event source disconnected: {0}")]
    Disconnected(String),
}

/// Failures while exporting statistics.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
