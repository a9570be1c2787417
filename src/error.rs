//! Error types for the persistence layer.
//!
//! Only [`StorageError::Io`] is meant to reach callers of the public
//! operations. Decode failures are recovered inside each backend and show
//! up as missing data.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading or writing persisted data.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File content could not be decoded into a known tagged shape.
    #[error("corrupt value: {0}")]
    CorruptValue(String),

    /// A file name in a database directory is not a valid encoded key.
    #[error("invalid key name: {0}")]
    InvalidKeyName(String),

    /// A server identity that cannot be used as a directory name.
    #[error("invalid server identity: {0:?}")]
    InvalidServerId(String),

    /// The requested key has no backing file or entry.
    #[error("key not found")]
    NotFound,

    /// OS-level failure (permissions, disk full, ...).
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt(msg: impl std::fmt::Display) -> Self {
        StorageError::CorruptValue(msg.to_string())
    }

    /// True for errors that backends recover from by treating data as absent.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::CorruptValue(_) | StorageError::InvalidKeyName(_) | StorageError::NotFound
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::CorruptValue(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
