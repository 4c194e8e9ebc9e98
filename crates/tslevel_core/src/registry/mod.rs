//! Level registry.
//!
//! The registry maps every partition to `max_levels` level buckets, once for
//! sequence files and once for unsequence files. A single reader/writer lock
//! guards both axes:
//!
//! - mutations (`add`, `remove`, `clear`, the compaction swap) take the
//!   write lock;
//! - reads (`contains`, `size`, `list_by_partition`, `fork`) take the read
//!   lock and may run concurrently.
//!
//! `fork` copies sealed files out under the read lock. The last fork is
//! remembered so that removals can purge it while a compaction cycle is
//! still iterating over it.

mod fork;
mod level;

pub use fork::ForkedSnapshot;

use crate::config::CompactionConfig;
use crate::error::CoreResult;
use crate::resource::FileResource;
use crate::types::PartitionId;
use level::LevelBucket;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

type Levels = Vec<LevelBucket>;

#[derive(Debug, Default)]
struct RegistryState {
    sequence: BTreeMap<PartitionId, Levels>,
    unsequence: BTreeMap<PartitionId, Levels>,
}

impl RegistryState {
    fn axis(&self, is_sequence: bool) -> &BTreeMap<PartitionId, Levels> {
        if is_sequence {
            &self.sequence
        } else {
            &self.unsequence
        }
    }

    fn axis_mut(&mut self, is_sequence: bool) -> &mut BTreeMap<PartitionId, Levels> {
        if is_sequence {
            &mut self.sequence
        } else {
            &mut self.unsequence
        }
    }

    fn levels_mut(&mut self, partition: PartitionId, is_sequence: bool, max_levels: usize) -> &mut Levels {
        self.axis_mut(is_sequence)
            .entry(partition)
            .or_insert_with(|| vec![LevelBucket::new(is_sequence); max_levels])
    }

    fn insert(&mut self, file: Arc<FileResource>, level: usize, is_sequence: bool, max_levels: usize) {
        let levels = self.levels_mut(file.partition(), is_sequence, max_levels);
        levels[level.min(max_levels - 1)].insert(file);
    }

    fn remove(&mut self, file: &FileResource, is_sequence: bool) -> bool {
        let Some(levels) = self.axis_mut(is_sequence).get_mut(&file.partition()) else {
            return false;
        };
        let mut removed = false;
        for level in levels {
            removed |= level.remove(file);
        }
        removed
    }
}

/// Registry of the data files of one storage group, by partition and level.
#[derive(Debug)]
pub struct LevelRegistry {
    max_levels: usize,
    state: RwLock<RegistryState>,
    forked: Mutex<ForkedSnapshot>,
}

impl LevelRegistry {
    /// Creates an empty registry sized by `config.max_level_num`.
    #[must_use]
    pub fn new(config: &CompactionConfig) -> Self {
        Self::with_max_levels(config.max_level_num)
    }

    /// Creates an empty registry with `max_levels` levels (at least one).
    #[must_use]
    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            max_levels: max_levels.max(1),
            state: RwLock::new(RegistryState::default()),
            forked: Mutex::new(ForkedSnapshot::default()),
        }
    }

    /// Number of levels per partition.
    #[must_use]
    pub const fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// Adds a file at the level derived from its merge count. Returns the
    /// level it was placed at.
    pub fn add(&self, file: Arc<FileResource>, is_sequence: bool) -> usize {
        let level = file.level(self.max_levels);
        self.state
            .write()
            .insert(file, level, is_sequence, self.max_levels);
        level
    }

    /// Adds every file in `files`.
    pub fn add_all(&self, files: impl IntoIterator<Item = Arc<FileResource>>, is_sequence: bool) {
        let mut state = self.state.write();
        for file in files {
            let level = file.level(self.max_levels);
            state.insert(file, level, is_sequence, self.max_levels);
        }
    }

    /// Removes a file from every level of its partition and from the
    /// current fork. Returns whether the registry held it.
    pub fn remove(&self, file: &FileResource, is_sequence: bool) -> bool {
        let mut state = self.state.write();
        let removed = state.remove(file, is_sequence);
        self.forked.lock().purge(file, is_sequence);
        removed
    }

    /// Removes every file in `files`.
    pub fn remove_all(&self, files: &[Arc<FileResource>], is_sequence: bool) {
        let mut state = self.state.write();
        let mut forked = self.forked.lock();
        for file in files {
            state.remove(file, is_sequence);
            forked.purge(file, is_sequence);
        }
    }

    /// Returns true if the file is registered on the given axis.
    #[must_use]
    pub fn contains(&self, file: &FileResource, is_sequence: bool) -> bool {
        self.state
            .read()
            .axis(is_sequence)
            .get(&file.partition())
            .is_some_and(|levels| levels.iter().any(|level| level.contains(file.path())))
    }

    /// Returns true if no file is registered on the given axis.
    #[must_use]
    pub fn is_empty(&self, is_sequence: bool) -> bool {
        self.state
            .read()
            .axis(is_sequence)
            .values()
            .flatten()
            .all(|level| level.len() == 0)
    }

    /// Number of files on the given axis.
    #[must_use]
    pub fn size(&self, is_sequence: bool) -> usize {
        self.state
            .read()
            .axis(is_sequence)
            .values()
            .flatten()
            .map(LevelBucket::len)
            .sum()
    }

    /// Files of one partition, highest level first.
    #[must_use]
    pub fn list_by_partition(&self, is_sequence: bool, partition: PartitionId) -> Vec<Arc<FileResource>> {
        self.state
            .read()
            .axis(is_sequence)
            .get(&partition)
            .map(|levels| flatten(levels))
            .unwrap_or_default()
    }

    /// Files of every partition in ascending partition order, each partition
    /// highest level first.
    #[must_use]
    pub fn list(&self, is_sequence: bool) -> Vec<Arc<FileResource>> {
        self.state
            .read()
            .axis(is_sequence)
            .values()
            .flat_map(|levels| flatten(levels))
            .collect()
    }

    /// Partitions known on the given axis, ascending.
    #[must_use]
    pub fn partitions(&self, is_sequence: bool) -> Vec<PartitionId> {
        self.state.read().axis(is_sequence).keys().copied().collect()
    }

    /// Number of files per level, level 0 first. Empty for an unknown partition.
    #[must_use]
    pub fn level_sizes(&self, is_sequence: bool, partition: PartitionId) -> Vec<usize> {
        self.state
            .read()
            .axis(is_sequence)
            .get(&partition)
            .map(|levels| levels.iter().map(LevelBucket::len).collect())
            .unwrap_or_default()
    }

    /// Drops every partition and the current fork.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.sequence.clear();
        state.unsequence.clear();
        *self.forked.lock() = ForkedSnapshot::default();
    }

    /// Copies the sealed files of `partition`, replacing the previous fork.
    pub fn fork(&self, partition: PartitionId) -> ForkedSnapshot {
        let state = self.state.read();
        let copy = |is_sequence: bool| -> Vec<Vec<Arc<FileResource>>> {
            match state.axis(is_sequence).get(&partition) {
                Some(levels) => levels.iter().map(LevelBucket::closed_files).collect(),
                None => vec![Vec::new(); self.max_levels],
            }
        };
        let snapshot = ForkedSnapshot::new(partition, copy(true), copy(false));
        *self.forked.lock() = snapshot.clone();
        snapshot
    }

    /// Copy of one level of the current fork.
    #[must_use]
    pub fn forked_level(&self, is_sequence: bool, level: usize) -> Vec<Arc<FileResource>> {
        self.forked.lock().level(is_sequence, level).to_vec()
    }

    /// Replaces compaction sources with their merge targets in one step.
    ///
    /// `precommit` runs after the write lock is taken and before anything
    /// changes; if it fails the registry is left as it was. Sources are
    /// removed from every level of their partition, targets are inserted at
    /// sequence level 0. Readers observe either the old or the new state.
    ///
    /// # Errors
    ///
    /// Returns the error from `precommit`.
    pub fn swap(
        &self,
        sequence_sources: &[Arc<FileResource>],
        unsequence_sources: &[Arc<FileResource>],
        targets: &[Arc<FileResource>],
        precommit: impl FnOnce() -> CoreResult<()>,
    ) -> CoreResult<()> {
        let mut state = self.state.write();
        precommit()?;

        let mut forked = self.forked.lock();
        for (sources, is_sequence) in [(unsequence_sources, false), (sequence_sources, true)] {
            for file in sources {
                state.remove(file, is_sequence);
                forked.purge(file, is_sequence);
            }
        }
        for target in targets {
            state.insert(Arc::clone(target), 0, true, self.max_levels);
        }
        Ok(())
    }
}

fn flatten(levels: &[LevelBucket]) -> Vec<Arc<FileResource>> {
    levels
        .iter()
        .rev()
        .flat_map(LevelBucket::iter)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::TimeRange;
    use proptest::prelude::*;
    use std::thread;

    fn file(partition: i64, name: &str) -> Arc<FileResource> {
        let path = format!("/sg/sequence/{partition}/{name}");
        let file = FileResource::new(path, PartitionId::new(partition), TimeRange::new(0, 10), 10).unwrap();
        file.close();
        Arc::new(file)
    }

    fn open_file(partition: i64, name: &str) -> Arc<FileResource> {
        let path = format!("/sg/sequence/{partition}/{name}");
        Arc::new(FileResource::new(path, PartitionId::new(partition), TimeRange::new(0, 10), 10).unwrap())
    }

    #[test]
    fn add_places_by_merge_count() {
        let registry = LevelRegistry::with_max_levels(3);
        assert_eq!(registry.add(file(1, "1-1-0.tsfile"), true), 0);
        assert_eq!(registry.add(file(1, "2-1-1.tsfile"), true), 1);
        assert_eq!(registry.add(file(1, "3-1-7.tsfile"), true), 2);
        assert_eq!(registry.level_sizes(true, PartitionId::new(1)), vec![1, 1, 1]);
        assert_eq!(registry.size(true), 3);
        assert_eq!(registry.size(false), 0);
    }

    #[test]
    fn partition_created_with_all_levels() {
        let registry = LevelRegistry::with_max_levels(4);
        registry.add(file(9, "1-1-0.tsfile"), false);
        assert_eq!(registry.level_sizes(false, PartitionId::new(9)).len(), 4);
        assert!(registry.level_sizes(true, PartitionId::new(9)).is_empty());
    }

    #[test]
    fn list_by_partition_is_highest_level_first() {
        let registry = LevelRegistry::with_max_levels(3);
        registry.add(file(1, "1-1-0.tsfile"), true);
        registry.add(file(1, "2-1-2.tsfile"), true);
        registry.add(file(1, "3-1-1.tsfile"), true);
        registry.add(file(2, "4-1-0.tsfile"), true);

        let merges: Vec<_> = registry
            .list_by_partition(true, PartitionId::new(1))
            .iter()
            .map(|f| f.merge_count())
            .collect();
        assert_eq!(merges, vec![2, 1, 0]);
        assert!(registry.list_by_partition(true, PartitionId::new(5)).is_empty());
        assert_eq!(registry.list(true).len(), 4);
        assert_eq!(registry.partitions(true), vec![PartitionId::new(1), PartitionId::new(2)]);
    }

    #[test]
    fn unsequence_duplicates_allowed_sequence_not() {
        let registry = LevelRegistry::with_max_levels(2);
        let f = file(1, "1-1-0.tsfile");
        registry.add(Arc::clone(&f), true);
        registry.add(Arc::clone(&f), true);
        registry.add(Arc::clone(&f), false);
        registry.add(Arc::clone(&f), false);
        assert_eq!(registry.size(true), 1);
        assert_eq!(registry.size(false), 2);
    }

    #[test]
    fn remove_and_contains() {
        let registry = LevelRegistry::with_max_levels(2);
        let f = file(1, "1-1-0.tsfile");
        assert!(!registry.contains(&f, true));
        registry.add(Arc::clone(&f), true);
        assert!(registry.contains(&f, true));
        assert!(!registry.contains(&f, false));
        assert!(registry.remove(&f, true));
        assert!(!registry.remove(&f, true));
        assert!(registry.is_empty(true));
    }

    #[test]
    fn contains_does_not_create_partition() {
        let registry = LevelRegistry::with_max_levels(2);
        assert!(!registry.contains(&file(3, "1-1-0.tsfile"), true));
        assert!(registry.partitions(true).is_empty());
    }

    #[test]
    fn fork_skips_open_files_and_replaces_previous() {
        let registry = LevelRegistry::with_max_levels(2);
        registry.add(file(1, "1-1-0.tsfile"), true);
        registry.add(open_file(1, "2-1-0.tsfile"), true);

        let first = registry.fork(PartitionId::new(1));
        assert_eq!(first.level(true, 0).len(), 1);

        let second = registry.fork(PartitionId::new(2));
        assert!(second.is_empty());
        assert_eq!(second.level_count(true), 2);
        assert!(registry.forked_level(true, 0).is_empty());
    }

    #[test]
    fn fork_is_isolated_from_later_adds() {
        let registry = LevelRegistry::with_max_levels(2);
        registry.add(file(1, "1-1-0.tsfile"), true);
        let snapshot = registry.fork(PartitionId::new(1));

        registry.add(file(1, "2-1-0.tsfile"), true);
        assert_eq!(snapshot.level(true, 0).len(), 1);
        assert_eq!(registry.list_by_partition(true, PartitionId::new(1)).len(), 2);
    }

    #[test]
    fn remove_purges_current_fork() {
        let registry = LevelRegistry::with_max_levels(2);
        let f = file(1, "1-1-0.tsfile");
        registry.add(Arc::clone(&f), false);
        registry.fork(PartitionId::new(1));
        assert_eq!(registry.forked_level(false, 0).len(), 1);

        registry.remove_all(&[Arc::clone(&f)], false);
        assert!(registry.forked_level(false, 0).is_empty());
    }

    #[test]
    fn swap_replaces_sources_with_targets() {
        let registry = LevelRegistry::with_max_levels(3);
        let seq = file(1, "1-1-0.tsfile");
        let unseq = file(1, "2-1-0.tsfile");
        registry.add(Arc::clone(&seq), true);
        registry.add(Arc::clone(&unseq), false);

        let target = file(1, "1-1-1.tsfile");
        registry
            .swap(&[seq], &[unseq], &[Arc::clone(&target)], || Ok(()))
            .unwrap();

        assert_eq!(registry.level_sizes(true, PartitionId::new(1)), vec![1, 0, 0]);
        assert_eq!(registry.size(false), 0);
        assert!(registry.contains(&target, true));
    }

    #[test]
    fn failed_precommit_leaves_registry_untouched() {
        let registry = LevelRegistry::with_max_levels(2);
        let seq = file(1, "1-1-0.tsfile");
        registry.add(Arc::clone(&seq), true);

        let result = registry.swap(&[Arc::clone(&seq)], &[], &[file(1, "1-1-1.tsfile")], || {
            Err(CoreError::cancelled("test"))
        });
        assert!(result.is_err());
        assert!(registry.contains(&seq, true));
        assert_eq!(registry.size(true), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let registry = LevelRegistry::with_max_levels(2);
        registry.add(file(1, "1-1-0.tsfile"), true);
        registry.add(file(2, "1-1-0.tsfile"), false);
        assert!(!registry.is_empty(false));
        registry.clear();
        assert!(registry.is_empty(true));
        assert!(registry.is_empty(false));
        assert!(registry.partitions(true).is_empty());
    }

    #[test]
    fn concurrent_adds_are_all_kept() {
        let registry = Arc::new(LevelRegistry::with_max_levels(2));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..50 {
                        registry.add(file(1, &format!("{}-{t}-0.tsfile", i + 1)), true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.size(true), 200);
    }

    proptest! {
        #[test]
        fn level_is_clamped_never_dropped(max_levels in 1usize..6, merges in prop::collection::vec(0u32..20, 1..20)) {
            let registry = LevelRegistry::with_max_levels(max_levels);
            for (i, merge) in merges.iter().enumerate() {
                let level = registry.add(file(0, &format!("{}-1-{merge}.tsfile", i + 1)), true);
                prop_assert!(level < max_levels);
                prop_assert_eq!(level, (*merge as usize).min(max_levels - 1));
            }
            prop_assert_eq!(registry.size(true), merges.len());
            prop_assert_eq!(registry.level_sizes(true, PartitionId::new(0)).len(), max_levels);
        }
    }
}
