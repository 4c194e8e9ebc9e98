//! Data file handles.

use crate::error::CoreResult;
use crate::naming::TsFileName;
use crate::ordering::OrderKey;
use crate::types::{PartitionId, TimeRange};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tslevel_storage::TsFileReader;

/// One immutable data file and its lifecycle flags.
///
/// Handles are shared as `Arc<FileResource>` between the registry, forked
/// snapshots and in-flight merges. Two handles are equal when they point
/// at the same path.
pub struct FileResource {
    path: PathBuf,
    partition: PartitionId,
    time_range: TimeRange,
    size: u64,
    order_key: OrderKey,
    closed: AtomicBool,
    deleted: AtomicBool,
    lock: Mutex<()>,
}

impl FileResource {
    /// Creates a handle for a file that is still being written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file name does not parse.
    pub fn new(
        path: impl Into<PathBuf>,
        partition: PartitionId,
        time_range: TimeRange,
        size: u64,
    ) -> CoreResult<Self> {
        let path = path.into();
        let order_key = OrderKey::for_path(&path)?;
        Ok(Self {
            path,
            partition,
            time_range,
            size,
            order_key,
            closed: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            lock: Mutex::new(()),
        })
    }

    /// Creates a closed handle for a finished file, reading its time range
    /// from the file header.
    ///
    /// # Errors
    ///
    /// Returns an error if the name does not parse or the header cannot be read.
    pub fn open_sealed(path: impl Into<PathBuf>, partition: PartitionId) -> CoreResult<Self> {
        let path = path.into();
        let meta = TsFileReader::read_meta(&path)?;
        let size = std::fs::metadata(&path)?.len();
        let resource = Self::new(path, partition, TimeRange::new(meta.min_time, meta.max_time), size)?;
        resource.close();
        Ok(resource)
    }

    /// Path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Partition the file belongs to.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Time range covered by the file.
    #[must_use]
    pub const fn time_range(&self) -> TimeRange {
        self.time_range
    }

    /// On-disk size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Parsed file name.
    #[must_use]
    pub const fn name(&self) -> &TsFileName {
        self.order_key.name()
    }

    /// Sort key within a sequence level.
    #[must_use]
    pub const fn order_key(&self) -> &OrderKey {
        &self.order_key
    }

    /// Number of merges recorded in the file name.
    #[must_use]
    pub const fn merge_count(&self) -> u32 {
        self.order_key.name().merge_count
    }

    /// Level this file belongs to when `max_levels` levels exist.
    ///
    /// Files merged more often than the configuration allows are pinned to
    /// the last level.
    #[must_use]
    pub fn level(&self, max_levels: usize) -> usize {
        let last = max_levels.saturating_sub(1);
        usize::try_from(self.merge_count()).map_or(last, |count| count.min(last))
    }

    /// Seals the file. Only closed files are compaction input.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns true once the file is sealed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the file as logically removed.
    pub fn set_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Returns true once the file was replaced and removed.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Takes the per-file exclusive lock.
    ///
    /// Held only around the delete sequence of a single file; never taken
    /// while the registry lock is held.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

impl PartialEq for FileResource {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileResource {}

impl fmt::Debug for FileResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileResource")
            .field("path", &self.path)
            .field("partition", &self.partition)
            .field("time_range", &self.time_range)
            .field("size", &self.size)
            .field("closed", &self.is_closed())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl fmt::Display for FileResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tslevel_storage::{DataPoint, TsFileWriter};

    fn resource(path: &str) -> FileResource {
        FileResource::new(path, PartitionId::new(0), TimeRange::new(0, 10), 100).unwrap()
    }

    #[test]
    fn starts_open_and_live() {
        let file = resource("/sg/0/1-1-0.tsfile");
        assert!(!file.is_closed());
        assert!(!file.is_deleted());
        file.close();
        file.set_deleted();
        assert!(file.is_closed());
        assert!(file.is_deleted());
    }

    #[test]
    fn level_follows_merge_count() {
        assert_eq!(resource("/sg/0/1-1-0.tsfile").level(4), 0);
        assert_eq!(resource("/sg/0/1-1-2.tsfile").level(4), 2);
        assert_eq!(resource("/sg/0/1-1-9.tsfile").level(4), 3);
        assert_eq!(resource("/sg/0/1-1-9.tsfile").level(1), 0);
    }

    #[test]
    fn rejects_bad_name() {
        let err = FileResource::new("/sg/0/data.bin", PartitionId::new(0), TimeRange::new(0, 0), 0);
        assert!(err.is_err());
    }

    #[test]
    fn equality_is_by_path() {
        let a = resource("/sg/0/1-1-0.tsfile");
        let b = FileResource::new("/sg/0/1-1-0.tsfile", PartitionId::new(3), TimeRange::new(5, 6), 1)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, resource("/sg/0/2-1-0.tsfile"));
    }

    #[test]
    fn open_sealed_reads_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0").join("7-1-0.tsfile");
        let mut writer = TsFileWriter::new(&path);
        writer.write(DataPoint::new("s1", 10, 1.0)).unwrap();
        writer.write(DataPoint::new("s1", 25, 2.0)).unwrap();
        writer.finish().unwrap();

        let file = FileResource::open_sealed(&path, PartitionId::new(0)).unwrap();
        assert!(file.is_closed());
        assert_eq!(file.time_range(), TimeRange::new(10, 25));
        assert!(file.size() > 0);
    }
}
