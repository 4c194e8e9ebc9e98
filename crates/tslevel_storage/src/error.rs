//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing on-disk files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A data file is truncated or otherwise malformed.
    #[error("corrupted file {path}: {reason}")]
    Corrupted {
        /// The offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A data file's trailer checksum did not match its contents.
    #[error("checksum mismatch in {path}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// The offending file.
        path: PathBuf,
        /// Checksum stored in the file.
        expected: u32,
        /// Checksum computed over the contents.
        actual: u32,
    },

    /// A modification record could not be parsed.
    #[error("invalid modification record at line {line}: {reason}")]
    InvalidModification {
        /// 1-based line number in the modification file.
        line: usize,
        /// Why the record was rejected.
        reason: String,
    },

    /// Points were written out of order.
    #[error("point out of order: series {series} time {time}")]
    OutOfOrder {
        /// Series of the rejected point.
        series: String,
        /// Timestamp of the rejected point.
        time: i64,
    },
}

impl StorageError {
    /// Creates a corruption error for `path`.
    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
