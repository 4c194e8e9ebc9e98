//! Error types for the compaction manager.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur inside the compaction manager.
///
/// None of these escape a compaction cycle: the orchestrator turns them
/// into a [`crate::CycleOutcome`]. They surface from construction,
/// recovery and the lower-level building blocks.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] tslevel_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A data file name does not follow `{time}-{version}-{merge}[-{split}].tsfile`.
    #[error("invalid data file name {name:?}: {reason}")]
    InvalidFileName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration values are out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Which value is wrong and why.
        message: String,
    },

    /// The external merge writer failed.
    #[error("merge failed: {message}")]
    MergeFailed {
        /// Description of the failure.
        message: String,
    },

    /// The merge selector could not produce a selection.
    #[error("file selection failed: {message}")]
    SelectionFailed {
        /// Description of the failure.
        message: String,
    },

    /// The compaction log is malformed.
    #[error("compaction log corruption in {path}: {message}")]
    LogCorruption {
        /// Path of the log file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch in a compaction log record.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Another process holds the storage group directory lock.
    #[error("storage group locked: another process has exclusive access")]
    StorageGroupLocked,

    /// The cycle was asked to stop before committing.
    #[error("compaction cancelled: {reason}")]
    Cancelled {
        /// Where the cancellation was observed.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid file name error.
    pub fn invalid_file_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFileName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a merge failure error.
    pub fn merge_failed(message: impl Into<String>) -> Self {
        Self::MergeFailed {
            message: message.into(),
        }
    }

    /// Creates a selection failure error.
    pub fn selection_failed(message: impl Into<String>) -> Self {
        Self::SelectionFailed {
            message: message.into(),
        }
    }

    /// Creates a compaction log corruption error.
    pub fn log_corruption(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
