//! Per-level file containers.

use crate::ordering::OrderKey;
use crate::resource::FileResource;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Files of one level within one partition.
///
/// Sequence levels are kept sorted by [`OrderKey`] and hold at most one
/// file per key; unsequence levels keep insertion order.
#[derive(Debug, Clone)]
pub(crate) enum LevelBucket {
    Sequence(BTreeMap<OrderKey, Arc<FileResource>>),
    Unsequence(Vec<Arc<FileResource>>),
}

impl LevelBucket {
    pub(crate) fn new(is_sequence: bool) -> Self {
        if is_sequence {
            Self::Sequence(BTreeMap::new())
        } else {
            Self::Unsequence(Vec::new())
        }
    }

    /// Inserts a file. Re-inserting a file already present in a sequence
    /// level is a no-op.
    pub(crate) fn insert(&mut self, file: Arc<FileResource>) {
        match self {
            Self::Sequence(files) => {
                files.entry(file.order_key().clone()).or_insert(file);
            }
            Self::Unsequence(files) => files.push(file),
        }
    }

    /// Removes every entry for `path`. Returns whether anything was removed.
    pub(crate) fn remove(&mut self, file: &FileResource) -> bool {
        match self {
            Self::Sequence(files) => {
                let matches = files
                    .get(file.order_key())
                    .is_some_and(|stored| stored.path() == file.path());
                matches && files.remove(file.order_key()).is_some()
            }
            Self::Unsequence(files) => {
                let before = files.len();
                files.retain(|stored| stored.path() != file.path());
                files.len() != before
            }
        }
    }

    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.iter().any(|file| file.path() == path)
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Sequence(files) => files.len(),
            Self::Unsequence(files) => files.len(),
        }
    }

    pub(crate) fn iter(&self) -> Box<dyn Iterator<Item = &Arc<FileResource>> + '_> {
        match self {
            Self::Sequence(files) => Box::new(files.values()),
            Self::Unsequence(files) => Box::new(files.iter()),
        }
    }

    /// Copies out the sealed files, in level order.
    pub(crate) fn closed_files(&self) -> Vec<Arc<FileResource>> {
        self.iter().filter(|file| file.is_closed()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartitionId, TimeRange};

    fn file(path: &str) -> Arc<FileResource> {
        let file = FileResource::new(path, PartitionId::new(0), TimeRange::new(0, 1), 1).unwrap();
        file.close();
        Arc::new(file)
    }

    #[test]
    fn sequence_insert_is_idempotent_and_sorted() {
        let mut level = LevelBucket::new(true);
        level.insert(file("/sg/0/20-1-0.tsfile"));
        level.insert(file("/sg/0/10-1-0.tsfile"));
        level.insert(file("/sg/0/20-1-0.tsfile"));

        let names: Vec<_> = level.iter().map(|f| f.name().time).collect();
        assert_eq!(names, vec![10, 20]);
    }

    #[test]
    fn unsequence_keeps_insertion_order() {
        let mut level = LevelBucket::new(false);
        level.insert(file("/sg/0/20-1-0.tsfile"));
        level.insert(file("/sg/0/10-1-0.tsfile"));

        let names: Vec<_> = level.iter().map(|f| f.name().time).collect();
        assert_eq!(names, vec![20, 10]);
    }

    #[test]
    fn sequence_remove_requires_same_path() {
        let mut level = LevelBucket::new(true);
        level.insert(file("/a/0/5-1-0.tsfile"));
        assert!(!level.remove(&file("/b/0/5-1-0.tsfile")));
        assert!(level.remove(&file("/a/0/5-1-0.tsfile")));
        assert_eq!(level.len(), 0);
    }

    #[test]
    fn closed_files_skip_open_ones() {
        let mut level = LevelBucket::new(false);
        level.insert(file("/sg/0/1-1-0.tsfile"));
        let open = FileResource::new("/sg/0/2-1-0.tsfile", PartitionId::new(0), TimeRange::new(0, 1), 1)
            .unwrap();
        level.insert(Arc::new(open));

        let closed = level.closed_files();
        assert_eq!(closed.len(), 1);
        assert!(level.contains(Path::new("/sg/0/2-1-0.tsfile")));
    }
}
