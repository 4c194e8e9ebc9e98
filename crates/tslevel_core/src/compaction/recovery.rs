//! Undoing or finishing an interrupted merge.
//!
//! The registry is never touched here: the swap is the only step that
//! mutates it, and a cycle interrupted before the swap left it as it was.
//! Recovery only repairs the files on disk and removes the log.

use super::log::{CompactionLogAnalyzer, CompactionLogSummary};
use super::rename_to_deleted;
use crate::collaborators::ModificationStore;
use crate::error::CoreResult;
use crate::naming::TsFileName;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tslevel_storage::TsFileReader;

/// What a recovery run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Whether a compaction log was present.
    pub log_found: bool,
    /// Whether the log was unreadable and discarded.
    pub log_corrupted: bool,
    /// Whether the interrupted merge was kept rather than undone.
    pub merge_kept: bool,
    /// Partial target files that were deleted.
    pub removed_targets: Vec<PathBuf>,
    /// Leftover source files that were mark-deleted.
    pub deleted_sources: Vec<PathBuf>,
}

/// Inspects the compaction log of one storage group and repairs disk state.
pub struct RecoveryController {
    log_path: PathBuf,
    modifications: Arc<dyn ModificationStore>,
}

impl RecoveryController {
    /// Creates a controller for the log at `log_path`.
    pub fn new(log_path: impl Into<PathBuf>, modifications: Arc<dyn ModificationStore>) -> Self {
        Self {
            log_path: log_path.into(),
            modifications,
        }
    }

    /// Path of the log this controller inspects.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Repairs the files named in the log, then deletes the log.
    ///
    /// If the swap had committed, or any logged source is already gone,
    /// the merge is kept: its target stays and leftover sources are
    /// mark-deleted. Otherwise the target and its split siblings are
    /// deleted. A corrupted log is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be deleted or renamed. The log is
    /// kept in that case so the next run retries.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        if !self.log_path.exists() {
            return Ok(report);
        }
        report.log_found = true;

        match CompactionLogAnalyzer::analyze(&self.log_path) {
            Ok(summary) => {
                if summary_keeps_merge(&summary) {
                    report.merge_kept = true;
                    report.deleted_sources = self.finish_sources(&summary)?;
                } else if let Some(target) = &summary.target {
                    report.removed_targets = self.remove_target_family(target)?;
                }
            }
            Err(err) => {
                warn!(log = %self.log_path.display(), error = %err, "discarding corrupted compaction log");
                report.log_corrupted = true;
            }
        }

        remove_if_exists(&self.log_path)?;
        info!(
            log = %self.log_path.display(),
            merge_kept = report.merge_kept,
            removed_targets = report.removed_targets.len(),
            deleted_sources = report.deleted_sources.len(),
            "compaction log recovered"
        );
        Ok(report)
    }

    fn finish_sources(&self, summary: &CompactionLogSummary) -> CoreResult<Vec<PathBuf>> {
        let mut deleted = Vec::new();
        for (source, _) in &summary.sources {
            if source.exists() {
                let renamed = rename_to_deleted(source)?;
                debug!(source = %source.display(), renamed = %renamed.display(), "mark-deleted leftover source");
                deleted.push(source.clone());
            }
            self.modifications.remove(source)?;
        }
        Ok(deleted)
    }

    fn remove_target_family(&self, target: &Path) -> CoreResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let (Ok(name), Some(dir)) = (TsFileName::from_path(target), target.parent()) else {
            if target.exists() {
                fs::remove_file(target)?;
                removed.push(target.to_path_buf());
            }
            return Ok(removed);
        };
        if !dir.is_dir() {
            return Ok(removed);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let sibling = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| TsFileName::parse(n).ok());
            if sibling.is_some_and(|sibling| sibling.same_family(&name)) {
                fs::remove_file(&path)?;
                self.modifications.remove(&path)?;
                debug!(target = %path.display(), "removed partial merge target");
                removed.push(path);
            }
        }
        removed.sort();
        Ok(removed)
    }
}

impl std::fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryController")
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

/// A missing source only proves cleanup had begun if the target it was
/// merged into is complete.
fn summary_keeps_merge(summary: &CompactionLogSummary) -> bool {
    if summary.merge_finished {
        return true;
    }
    let Some(target) = &summary.target else {
        return false;
    };
    if !summary.sources.iter().any(|(path, _)| !path.exists()) {
        return false;
    }
    match TsFileReader::open(target) {
        Ok(_) => true,
        Err(err) => {
            warn!(target = %target.display(), error = %err, "source missing but merge target is incomplete");
            false
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
