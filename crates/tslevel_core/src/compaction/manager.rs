//! Compaction cycle orchestration.
//!
//! One cycle walks these states:
//!
//! ```text
//! IDLE -> FORKED -> SELECTING -> NO_CANDIDATE
//!                             -> MERGING -> SWAPPING -> CLEANUP -> IDLE
//! any step before the swap commits -> FAILED -> RESTORED -> IDLE
//! ```
//!
//! The registry is touched only in SWAPPING, under its write lock, and only
//! after the merge output is complete and its tombstones are written. The
//! merge itself reads a forked snapshot with no registry lock held. Source
//! files are removed from disk after the lock is released.
//!
//! Nothing escapes a cycle as an error: every path ends in a
//! [`CycleOutcome`].

use super::log::CompactionLogger;
use super::recovery::{RecoveryController, RecoveryReport};
use super::rename_to_deleted;
use super::tombstone::{carry_modifications, remove_source_modifications};
use crate::collaborators::{Collaborators, MergeRequest};
use crate::config::CompactionConfig;
use crate::dir::StorageGroupDir;
use crate::error::{CoreError, CoreResult};
use crate::registry::LevelRegistry;
use crate::resource::FileResource;
use crate::selector::{MergeSelector, Selection};
use crate::stats::CompactionStats;
use crate::types::PartitionId;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a compaction cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Sources were replaced by merge targets.
    Merged {
        /// Partition that was compacted.
        partition: PartitionId,
        /// Number of source files merged away.
        sources: usize,
        /// Paths of the produced files.
        targets: Vec<PathBuf>,
        /// Deletions carried onto the targets.
        tombstones_carried: usize,
    },
    /// Nothing was eligible for merging.
    NoCandidate,
    /// The merge could not be written; nothing changed.
    NotExecuted {
        /// Why the merge was not written.
        reason: String,
    },
    /// The cycle failed or was cancelled before committing.
    Failed {
        /// What went wrong.
        reason: String,
        /// Whether the restore afterwards succeeded.
        restored: bool,
    },
    /// Another cycle of this storage group was running.
    AlreadyRunning,
}

impl CycleOutcome {
    /// Returns true if the cycle got as far as running a merge.
    #[must_use]
    pub const fn executed(&self) -> bool {
        matches!(self, Self::Merged { .. } | Self::Failed { .. })
    }

    /// Returns true if the cycle committed a merge.
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

/// Cooperative cancellation of a running cycle.
///
/// Checked once, right before the registry swap. A request is consumed by
/// the check that observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    requested: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates a handle with no pending request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the current or next cycle to stop before committing.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Returns true if a cancellation is pending.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Withdraws a pending request.
    pub fn reset(&self) {
        self.requested.store(false, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

struct WorkingGuard<'a>(&'a AtomicBool);

impl Drop for WorkingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives compaction cycles for one storage group.
pub struct CompactionManager {
    storage_group: String,
    config: CompactionConfig,
    log_path: PathBuf,
    registry: Arc<LevelRegistry>,
    selector: Box<dyn MergeSelector>,
    collaborators: Collaborators,
    working: AtomicBool,
    cancel: CancelHandle,
    stats: CompactionStats,
}

impl CompactionManager {
    /// Creates a manager with an empty registry.
    ///
    /// The selector is the one named by `config.selector`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        storage_group: impl Into<String>,
        log_path: impl Into<PathBuf>,
        config: CompactionConfig,
        collaborators: Collaborators,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            storage_group: storage_group.into(),
            log_path: log_path.into(),
            registry: Arc::new(LevelRegistry::new(&config)),
            selector: Box::new(config.selector),
            config,
            collaborators,
            working: AtomicBool::new(false),
            cancel: CancelHandle::new(),
            stats: CompactionStats::new(),
        })
    }

    /// Opens a manager over a storage group directory: repairs any
    /// interrupted merge, then registers every live data file found.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, recovery fails or
    /// the directory cannot be scanned.
    pub fn open(
        dir: &StorageGroupDir,
        config: CompactionConfig,
        collaborators: Collaborators,
    ) -> CoreResult<Self> {
        let manager = Self::new(dir.name(), dir.compaction_log_path(), config, collaborators)?;
        manager.recover()?;

        let scanned = dir.scan()?;
        info!(
            storage_group = %manager.storage_group,
            sequence = scanned.sequence.len(),
            unsequence = scanned.unsequence.len(),
            "loaded data files"
        );
        manager.registry.add_all(scanned.sequence, true);
        manager.registry.add_all(scanned.unsequence, false);
        Ok(manager)
    }

    /// Replaces the selector named by the configuration.
    #[must_use]
    pub fn with_selector(mut self, selector: Box<dyn MergeSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Storage group name.
    #[must_use]
    pub fn storage_group(&self) -> &str {
        &self.storage_group
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Path of the compaction log.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// The registry this manager compacts.
    #[must_use]
    pub const fn registry(&self) -> &Arc<LevelRegistry> {
        &self.registry
    }

    /// Handle for cancelling cycles from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Counters of this manager.
    #[must_use]
    pub const fn stats(&self) -> &CompactionStats {
        &self.stats
    }

    /// Returns true while a cycle is running.
    #[must_use]
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Acquire)
    }

    /// Repairs the state left by an interrupted cycle, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a leftover file cannot be removed.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let report =
            RecoveryController::new(&self.log_path, Arc::clone(&self.collaborators.modifications))
                .recover()?;
        if report.log_found {
            self.stats.record_restore();
        }
        Ok(report)
    }

    /// Runs one compaction cycle over `partition`.
    pub fn run_cycle(&self, partition: PartitionId) -> CycleOutcome {
        if self
            .working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(storage_group = %self.storage_group, "compaction already running");
            return CycleOutcome::AlreadyRunning;
        }
        let _working = WorkingGuard(&self.working);

        self.stats.record_cycle_start();
        let started = Instant::now();
        let outcome = match self.try_cycle(partition) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    storage_group = %self.storage_group,
                    partition = partition.as_i64(),
                    error = %err,
                    "compaction cycle failed"
                );
                self.stats.record_failure();
                CycleOutcome::Failed {
                    reason: err.to_string(),
                    restored: self.restore(),
                }
            }
        };

        info!(
            storage_group = %self.storage_group,
            partition = partition.as_i64(),
            merged = outcome.is_merged(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction cycle finished"
        );
        outcome
    }

    /// Runs one cycle per partition that holds unsequence files, in
    /// ascending partition order.
    pub fn run_all(&self) -> Vec<(PartitionId, CycleOutcome)> {
        self.registry
            .partitions(false)
            .into_iter()
            .filter(|partition| {
                self.registry
                    .level_sizes(false, *partition)
                    .first()
                    .is_some_and(|&count| count > 0)
            })
            .map(|partition| (partition, self.run_cycle(partition)))
            .collect()
    }

    fn try_cycle(&self, partition: PartitionId) -> CoreResult<CycleOutcome> {
        // The log must only ever describe the merge in flight.
        if self.log_path.exists() {
            warn!(
                storage_group = %self.storage_group,
                log = %self.log_path.display(),
                "resolving leftover compaction log before cycle"
            );
            if let Err(err) = self.recover() {
                self.stats.record_failure();
                return Ok(CycleOutcome::NotExecuted {
                    reason: format!("leftover compaction log unresolved: {err}"),
                });
            }
        }

        // FORKED
        let snapshot = self.registry.fork(partition);
        debug!(
            storage_group = %self.storage_group,
            partition = partition.as_i64(),
            files = snapshot.file_count(),
            "forked"
        );

        // SELECTING
        let Some(selection) = self.select(snapshot.level(true, 0), snapshot.level(false, 0)) else {
            self.stats.record_no_candidate();
            return Ok(CycleOutcome::NoCandidate);
        };
        let Some(first) = selection.sequence.first() else {
            self.stats.record_no_candidate();
            return Ok(CycleOutcome::NoCandidate);
        };
        let target_dir = first
            .path()
            .parent()
            .ok_or_else(|| CoreError::invalid_operation("sequence file has no parent directory"))?;
        let target = first.name().with_incremented_merge_count().in_dir(target_dir);
        if target.exists() {
            warn!(target = %target.display(), "merge target already exists");
            self.stats.record_failure();
            return Ok(CycleOutcome::NotExecuted {
                reason: format!("target {} already exists", target.display()),
            });
        }
        let sources = selection.sources();
        debug!(
            storage_group = %self.storage_group,
            sequence = selection.sequence.len(),
            unsequence = selection.unsequence.len(),
            target = %target.display(),
            "selected merge sources"
        );

        // MERGING
        let mut log = CompactionLogger::open(&self.log_path);
        for file in &selection.sequence {
            log.log_source(file.path(), true)?;
        }
        for file in &selection.unsequence {
            log.log_source(file.path(), false)?;
        }
        log.log_target(&target)?;

        let modifications = sources
            .iter()
            .map(|file| self.collaborators.modifications.read(file.path()))
            .collect::<CoreResult<Vec<_>>>()?;
        let request = MergeRequest {
            target: &target,
            sources: &sources,
            modifications: &modifications,
            target_file_size: self.config.target_file_size,
        };
        let output = match self.collaborators.merger.merge(&request) {
            Ok(output) if !output.targets.is_empty() => output,
            Ok(_) => return Err(CoreError::merge_failed("merge produced no target file")),
            Err(err) => {
                error!(
                    storage_group = %self.storage_group,
                    target = %target.display(),
                    error = %err,
                    "merge write failed"
                );
                self.stats.record_failure();
                self.restore();
                return Ok(CycleOutcome::NotExecuted {
                    reason: err.to_string(),
                });
            }
        };
        info!(
            storage_group = %self.storage_group,
            sources = sources.len(),
            targets = output.targets.len(),
            "merged level-0 files into next level"
        );

        let carried = carry_modifications(
            self.collaborators.modifications.as_ref(),
            &sources,
            &output.targets,
            &output.applied,
        )?;

        // SWAPPING
        self.registry.swap(
            &selection.sequence,
            &selection.unsequence,
            &output.targets,
            || {
                if self.cancel.take() {
                    warn!(storage_group = %self.storage_group, "compaction cancelled before swap");
                    return Err(CoreError::cancelled("interrupted before registry swap"));
                }
                Ok(())
            },
        )?;
        if let Err(err) = log.log_merge_finished() {
            warn!(error = %err, "cannot record finished merge in compaction log");
        }

        // CLEANUP
        self.cleanup(&selection);
        if let Err(err) = log.remove() {
            warn!(log = %self.log_path.display(), error = %err, "cannot remove compaction log");
        }

        self.stats.record_merge(
            sources.len(),
            selection.estimated_cost(),
            output.targets.len(),
            carried,
        );
        Ok(CycleOutcome::Merged {
            partition,
            sources: sources.len(),
            targets: output.targets.iter().map(|t| t.path().to_path_buf()).collect(),
            tombstones_carried: carried,
        })
    }

    /// Level-0 selection: all sealed sequence files and the first sealed
    /// unsequence file. `None` means nothing to merge.
    fn select(
        &self,
        sequence: &[Arc<FileResource>],
        unsequence: &[Arc<FileResource>],
    ) -> Option<Selection> {
        if !self.config.enable_unseq_compaction {
            return None;
        }
        let first_unsequence = unsequence.first()?;

        match self.selector.select(
            self.config.merge_memory_budget,
            sequence,
            std::slice::from_ref(first_unsequence),
        ) {
            Ok(selection) if !selection.sequence.is_empty() => Some(selection),
            Ok(_) => None,
            Err(err) => {
                warn!(storage_group = %self.storage_group, error = %err, "cannot select files for merge");
                None
            }
        }
    }

    fn cleanup(&self, selection: &Selection) {
        for file in selection.sequence.iter().chain(&selection.unsequence) {
            match self.delete_level_file(file) {
                Ok(renamed) => {
                    info!(source = %file.path().display(), renamed = %renamed.display(), "deleted merged file");
                }
                Err(err) => {
                    warn!(source = %file.path().display(), error = %err, "cannot delete merged file");
                }
            }
        }
        for (file, err) in
            remove_source_modifications(self.collaborators.modifications.as_ref(), &selection.sources())
        {
            warn!(source = %file.path().display(), error = %err, "cannot remove modification file");
        }
    }

    /// Retires one file that is no longer in the registry: caches and
    /// readers forget it, it is flagged deleted, and it is renamed out of
    /// the way for a later sweep.
    fn delete_level_file(&self, file: &FileResource) -> CoreResult<PathBuf> {
        let _lock = file.lock();
        for cache in &self.collaborators.caches {
            cache.invalidate_path(file.path());
        }
        self.collaborators.readers.close_and_evict(file.path());
        file.set_deleted();
        Ok(rename_to_deleted(file.path())?)
    }

    fn restore(&self) -> bool {
        match self.recover() {
            Ok(report) => {
                debug!(
                    storage_group = %self.storage_group,
                    removed_targets = report.removed_targets.len(),
                    "restored after failed cycle"
                );
                true
            }
            Err(err) => {
                error!(storage_group = %self.storage_group, error = %err, "restore failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for CompactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionManager")
            .field("storage_group", &self.storage_group)
            .field("config", &self.config)
            .field("log_path", &self.log_path)
            .field("working", &self.is_working())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::FileModificationStore;
    use crate::naming::TsFileName;
    use crate::selector::SelectorKind;
    use tempfile::{tempdir, TempDir};
    use tslevel_storage::{DataPoint, MetadataCache, ReaderPool, TsFileWriter};

    struct Fixture {
        dir: TempDir,
        manager: CompactionManager,
    }

    impl Fixture {
        fn new(config: CompactionConfig) -> Self {
            let dir = tempdir().unwrap();
            let collaborators =
                Collaborators::local(Arc::new(ReaderPool::new()), Arc::new(MetadataCache::new()));
            let manager =
                CompactionManager::new("sg", dir.path().join("sg.compaction.log"), config, collaborators)
                    .unwrap();
            Self { dir, manager }
        }

        fn add(&self, is_sequence: bool, name: TsFileName, times: &[i64]) -> Arc<FileResource> {
            let axis = if is_sequence { "sequence" } else { "unsequence" };
            let path = name.in_dir(&self.dir.path().join(axis).join("0"));
            let mut writer = TsFileWriter::new(&path);
            for &t in times {
                writer.write(DataPoint::new("s1", t, t as f64)).unwrap();
            }
            writer.finish().unwrap();
            let file = Arc::new(FileResource::open_sealed(&path, PartitionId::new(0)).unwrap());
            self.manager.registry().add(Arc::clone(&file), is_sequence);
            file
        }
    }

    #[test]
    fn merges_level_zero() {
        let fx = Fixture::new(CompactionConfig::default());
        let seq = fx.add(true, TsFileName::new(1, 1, 0), &[1, 2, 3]);
        let unseq = fx.add(false, TsFileName::new(2, 2, 0), &[2, 5]);

        let outcome = fx.manager.run_cycle(PartitionId::new(0));
        let CycleOutcome::Merged { sources, targets, .. } = &outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(*sources, 2);
        assert_eq!(targets.len(), 1);
        assert!(outcome.executed());

        let registry = fx.manager.registry();
        assert_eq!(registry.level_sizes(true, PartitionId::new(0))[0], 1);
        assert!(registry.is_empty(false));
        assert!(seq.is_deleted());
        assert!(unseq.is_deleted());
        assert!(!seq.path().exists());
        assert!(!fx.manager.log_path().exists());
        assert!(!fx.manager.is_working());
        assert_eq!(fx.manager.stats().cycles_merged(), 1);
    }

    #[test]
    fn no_unsequence_is_no_candidate() {
        let fx = Fixture::new(CompactionConfig::default());
        fx.add(true, TsFileName::new(1, 1, 0), &[1]);
        assert_eq!(fx.manager.run_cycle(PartitionId::new(0)), CycleOutcome::NoCandidate);
    }

    #[test]
    fn disabled_unsequence_compaction_is_no_candidate() {
        let fx = Fixture::new(CompactionConfig::default().enable_unseq_compaction(false));
        fx.add(true, TsFileName::new(1, 1, 0), &[1]);
        fx.add(false, TsFileName::new(2, 1, 0), &[1]);
        assert_eq!(fx.manager.run_cycle(PartitionId::new(0)), CycleOutcome::NoCandidate);
        assert_eq!(fx.manager.registry().size(false), 1);
    }

    #[test]
    fn budget_too_small_is_no_candidate() {
        let fx = Fixture::new(CompactionConfig::default().merge_memory_budget(1));
        fx.add(true, TsFileName::new(1, 1, 0), &[1]);
        fx.add(false, TsFileName::new(2, 1, 0), &[1]);
        assert_eq!(fx.manager.run_cycle(PartitionId::new(0)), CycleOutcome::NoCandidate);
        assert_eq!(fx.manager.stats().snapshot().cycles_no_candidate, 1);
    }

    #[test]
    fn only_first_unsequence_file_is_merged() {
        let fx = Fixture::new(CompactionConfig::default().selector(SelectorKind::Budgeted));
        fx.add(true, TsFileName::new(1, 1, 0), &[1]);
        let first = fx.add(false, TsFileName::new(2, 1, 0), &[1]);
        let second = fx.add(false, TsFileName::new(3, 1, 0), &[1]);

        assert!(fx.manager.run_cycle(PartitionId::new(0)).is_merged());
        assert!(!fx.manager.registry().contains(&first, false));
        assert!(fx.manager.registry().contains(&second, false));
    }

    #[test]
    fn cancel_before_swap_fails_and_restores() {
        let fx = Fixture::new(CompactionConfig::default());
        let seq = fx.add(true, TsFileName::new(1, 1, 0), &[1]);
        fx.add(false, TsFileName::new(2, 1, 0), &[1]);
        fx.manager.cancel_handle().cancel();

        let outcome = fx.manager.run_cycle(PartitionId::new(0));
        assert!(matches!(outcome, CycleOutcome::Failed { restored: true, .. }));
        assert!(fx.manager.registry().contains(&seq, true));
        assert_eq!(fx.manager.registry().size(false), 1);
        assert!(!seq.is_deleted());
        assert!(!TsFileName::new(1, 1, 1).in_dir(seq.path().parent().unwrap()).exists());
        assert!(!fx.manager.log_path().exists());
        assert!(!fx.manager.cancel_handle().is_cancelled());

        assert!(fx.manager.run_cycle(PartitionId::new(0)).is_merged());
    }

    #[test]
    fn existing_target_is_not_overwritten() {
        let fx = Fixture::new(CompactionConfig::default());
        let seq = fx.add(true, TsFileName::new(1, 1, 0), &[1]);
        fx.add(false, TsFileName::new(2, 1, 0), &[1]);
        let blocker = TsFileName::new(1, 1, 1).in_dir(seq.path().parent().unwrap());
        std::fs::write(&blocker, b"live").unwrap();

        let outcome = fx.manager.run_cycle(PartitionId::new(0));
        assert!(matches!(outcome, CycleOutcome::NotExecuted { .. }));
        assert_eq!(std::fs::read(&blocker).unwrap(), b"live");
    }

    #[test]
    fn concurrent_cycle_is_refused() {
        let fx = Fixture::new(CompactionConfig::default());
        fx.manager.working.store(true, Ordering::Release);
        assert_eq!(fx.manager.run_cycle(PartitionId::new(0)), CycleOutcome::AlreadyRunning);
        assert!(!CycleOutcome::AlreadyRunning.executed());
    }

    #[test]
    fn run_all_skips_partitions_without_unsequence() {
        let fx = Fixture::new(CompactionConfig::default());
        fx.add(true, TsFileName::new(1, 1, 0), &[1]);
        fx.add(false, TsFileName::new(2, 1, 0), &[1]);

        let outcomes = fx.manager.run_all();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1.is_merged());
        assert!(fx.manager.run_all().is_empty());
    }

    #[test]
    fn invalid_config_rejected() {
        let collaborators = Collaborators {
            merger: Arc::new(crate::compaction::LocalFileMerger::new()),
            modifications: Arc::new(FileModificationStore),
            caches: Vec::new(),
            readers: Arc::new(ReaderPool::new()),
        };
        let result = CompactionManager::new(
            "sg",
            "/tmp/sg.compaction.log",
            CompactionConfig::default().max_level_num(0),
            collaborators,
        );
        assert!(result.is_err());
    }
}
