//! Point-in-time copies of the registry used as merge input.

use crate::resource::FileResource;
use crate::types::PartitionId;
use std::sync::Arc;

/// Sealed files of one partition, per axis and level, at fork time.
///
/// A snapshot is a value: later registry changes do not show up in it,
/// except that removing a file from the registry also drops it from the
/// snapshot the registry is tracking.
#[derive(Debug, Clone, Default)]
pub struct ForkedSnapshot {
    partition: Option<PartitionId>,
    sequence: Vec<Vec<Arc<FileResource>>>,
    unsequence: Vec<Vec<Arc<FileResource>>>,
}

impl ForkedSnapshot {
    pub(crate) fn new(
        partition: PartitionId,
        sequence: Vec<Vec<Arc<FileResource>>>,
        unsequence: Vec<Vec<Arc<FileResource>>>,
    ) -> Self {
        Self {
            partition: Some(partition),
            sequence,
            unsequence,
        }
    }

    /// Partition the snapshot was taken of, if any.
    #[must_use]
    pub const fn partition(&self) -> Option<PartitionId> {
        self.partition
    }

    /// Files of `level` on the given axis. Empty if the level does not exist.
    #[must_use]
    pub fn level(&self, is_sequence: bool, level: usize) -> &[Arc<FileResource>] {
        self.axis(is_sequence)
            .get(level)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of levels on the given axis.
    #[must_use]
    pub fn level_count(&self, is_sequence: bool) -> usize {
        self.axis(is_sequence).len()
    }

    /// Total number of files in the snapshot.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.sequence
            .iter()
            .chain(&self.unsequence)
            .map(Vec::len)
            .sum()
    }

    /// Returns true if the snapshot holds no file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_count() == 0
    }

    pub(crate) fn purge(&mut self, file: &FileResource, is_sequence: bool) {
        let levels = if is_sequence {
            &mut self.sequence
        } else {
            &mut self.unsequence
        };
        for level in levels {
            level.retain(|forked| forked.path() != file.path());
        }
    }

    fn axis(&self, is_sequence: bool) -> &[Vec<Arc<FileResource>>] {
        if is_sequence {
            &self.sequence
        } else {
            &self.unsequence
        }
    }
}
