//! Compaction: merge writing, tombstone carry-over, the compaction log,
//! recovery and the cycle orchestrator.

mod log;
mod manager;
mod merge;
mod recovery;
mod tombstone;

pub use log::{
    decode_records, CompactionLogAnalyzer, CompactionLogSummary, CompactionLogger, LogRecord,
    LogRecordType, COMPACTION_LOG_SUFFIX, LOG_MAGIC,
};
pub use manager::{CancelHandle, CompactionManager, CycleOutcome};
pub use merge::LocalFileMerger;
pub use recovery::{RecoveryController, RecoveryReport};
pub use tombstone::{carry_modifications, remove_source_modifications};

use crate::naming::deleted_path;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Renames a data file to its mark-deleted name and returns the new path.
pub(crate) fn rename_to_deleted(path: &Path) -> io::Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let renamed = deleted_path(path, millis);
    fs::rename(path, &renamed)?;
    Ok(renamed)
}
