//! Storage group directory management.
//!
//! This module handles the file system layout of one storage group:
//!
//! ```text
//! <root>/
//! ├─ LOCK                          # Advisory lock, one compactor per group
//! ├─ <name>.compaction.log         # Present only while a merge is in flight
//! ├─ sequence/<partition>/         # Sequence data files
//! │   ├─ 1700000000000-1-0.tsfile
//! │   └─ 1700000000000-1-0.tsfile.mods
//! └─ unsequence/<partition>/       # Unsequence data files
//! ```
//!
//! The LOCK file ensures only one process compacts a storage group at a time.

use crate::compaction::COMPACTION_LOG_SUFFIX;
use crate::error::{CoreError, CoreResult};
use crate::naming::{is_deleted_name, TsFileName, TSFILE_SUFFIX};
use crate::resource::FileResource;
use crate::types::PartitionId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

const LOCK_FILE: &str = "LOCK";

/// Directory holding sequence files.
pub const SEQUENCE_DIR: &str = "sequence";

/// Directory holding unsequence files.
pub const UNSEQUENCE_DIR: &str = "unsequence";

/// Data files found on disk by [`StorageGroupDir::scan`].
#[derive(Debug, Default)]
pub struct ScannedFiles {
    /// Sealed sequence files.
    pub sequence: Vec<Arc<FileResource>>,
    /// Sealed unsequence files.
    pub unsequence: Vec<Arc<FileResource>>,
}

/// A locked storage group directory.
///
/// Only one `StorageGroupDir` can exist per directory at a time; the lock is
/// released when it is dropped.
#[derive(Debug)]
pub struct StorageGroupDir {
    root: PathBuf,
    name: String,
    _lock_file: File,
}

impl StorageGroupDir {
    /// Opens or creates a storage group directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `name` is empty or contains a path separator
    /// - the directory doesn't exist and `create_if_missing` is false
    /// - another process holds the lock (returns `StorageGroupLocked`)
    /// - I/O errors occur
    pub fn open(root: &Path, name: &str, create_if_missing: bool) -> CoreResult<Self> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(CoreError::invalid_operation(format!(
                "invalid storage group name: {name:?}"
            )));
        }

        if !root.exists() {
            if create_if_missing {
                fs::create_dir_all(root)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "storage group directory does not exist: {}",
                    root.display()
                )));
            }
        }
        if !root.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                root.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StorageGroupLocked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            name: name.to_string(),
            _lock_file: lock_file,
        })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the compaction log.
    #[must_use]
    pub fn compaction_log_path(&self) -> PathBuf {
        self.root.join(format!("{}{COMPACTION_LOG_SUFFIX}", self.name))
    }

    /// Directory of one partition on one axis.
    #[must_use]
    pub fn partition_dir(&self, is_sequence: bool, partition: PartitionId) -> PathBuf {
        self.root
            .join(axis_dir(is_sequence))
            .join(partition.as_i64().to_string())
    }

    /// Path a new data file named `name` gets.
    #[must_use]
    pub fn file_path(&self, is_sequence: bool, partition: PartitionId, name: &TsFileName) -> PathBuf {
        name.in_dir(&self.partition_dir(is_sequence, partition))
    }

    /// Discovers live data files.
    ///
    /// Mark-deleted files, modification files and anything that is not a
    /// readable data file are skipped. Files are returned sorted by path.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be listed.
    pub fn scan(&self) -> CoreResult<ScannedFiles> {
        Ok(ScannedFiles {
            sequence: self.scan_axis(true)?,
            unsequence: self.scan_axis(false)?,
        })
    }

    fn scan_axis(&self, is_sequence: bool) -> CoreResult<Vec<Arc<FileResource>>> {
        let axis = self.root.join(axis_dir(is_sequence));
        if !axis.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&axis)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(partition) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<i64>().ok())
                .map(PartitionId::new)
            else {
                warn!(path = %entry.path().display(), "skipping non-partition directory");
                continue;
            };

            for file in fs::read_dir(entry.path())? {
                let path = file?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if is_deleted_name(name) || !name.ends_with(TSFILE_SUFFIX) {
                    continue;
                }
                match FileResource::open_sealed(&path, partition) {
                    Ok(resource) => files.push(Arc::new(resource)),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable data file");
                    }
                }
            }
        }

        files.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(files)
    }
}

fn axis_dir(is_sequence: bool) -> &'static str {
    if is_sequence {
        SEQUENCE_DIR
    } else {
        UNSEQUENCE_DIR
    }
}
