//! Test fixtures and storage group helpers.
//!
//! Provides a locked storage group in a temporary directory and builders
//! for the data and modification files placed in it.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tslevel_core::{
    Collaborators, CompactionConfig, CompactionManager, FileModificationStore, FileResource,
    ModificationStore, PartitionId, StorageGroupDir, TimeRange, TsFileName,
};
use tslevel_storage::{DataPoint, Modification, TsFileWriter};

/// Series every builder writes to unless told otherwise.
pub const DEFAULT_SERIES: &str = "root.sg.d1.s1";

/// A storage group in a temporary directory, removed on drop.
pub struct TestStorageGroup {
    /// The locked directory.
    pub dir: StorageGroupDir,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestStorageGroup {
    /// Creates an empty storage group named `name`.
    pub fn new(name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = StorageGroupDir::open(&temp_dir.path().join(name), name, true)
            .expect("Failed to open storage group");
        Self {
            dir,
            _temp_dir: temp_dir,
        }
    }

    /// Storage group directory.
    pub fn root(&self) -> &Path {
        self.dir.root()
    }

    /// Path of the compaction log.
    pub fn log_path(&self) -> PathBuf {
        self.dir.compaction_log_path()
    }

    /// Path a data file named `name` gets in `partition`.
    pub fn path_of(&self, is_sequence: bool, partition: i64, name: TsFileName) -> PathBuf {
        self.dir.file_path(is_sequence, PartitionId::new(partition), &name)
    }

    /// Writes a data file with the given points and returns a sealed handle.
    pub fn write_file(
        &self,
        is_sequence: bool,
        partition: i64,
        name: TsFileName,
        points: &[(&str, i64, f64)],
    ) -> Arc<FileResource> {
        let path = self.path_of(is_sequence, partition, name);
        write_points(&path, points);
        Arc::new(
            FileResource::open_sealed(&path, PartitionId::new(partition))
                .expect("Failed to open written file"),
        )
    }

    /// Writes a data file with one point of [`DEFAULT_SERIES`] per timestamp.
    pub fn write_series(
        &self,
        is_sequence: bool,
        partition: i64,
        name: TsFileName,
        times: Range<i64>,
    ) -> Arc<FileResource> {
        let points: Vec<(&str, i64, f64)> =
            times.map(|t| (DEFAULT_SERIES, t, t as f64)).collect();
        self.write_file(is_sequence, partition, name, &points)
    }

    /// Records a deletion against a data file.
    pub fn delete(&self, data_path: &Path, modification: &Modification) {
        FileModificationStore
            .append(data_path, modification)
            .expect("Failed to append modification");
    }

    /// Reads the deletions recorded against a data file.
    pub fn modifications(&self, data_path: &Path) -> Vec<Modification> {
        FileModificationStore
            .read(data_path)
            .expect("Failed to read modifications")
    }

    /// Opens a compaction manager over this storage group.
    pub fn open_manager(
        &self,
        config: CompactionConfig,
        collaborators: Collaborators,
    ) -> CompactionManager {
        CompactionManager::open(&self.dir, config, collaborators)
            .expect("Failed to open compaction manager")
    }

    /// File names in a partition directory, sorted.
    pub fn list_dir(&self, is_sequence: bool, partition: i64) -> Vec<String> {
        let dir = self.dir.partition_dir(is_sequence, PartitionId::new(partition));
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| {
                e.expect("Failed to read directory entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }
}

/// Writes a tsfile at `path`, sorting the points first.
pub fn write_points(path: &Path, points: &[(&str, i64, f64)]) {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));
    sorted.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);

    let mut writer = TsFileWriter::new(path);
    for (series, time, value) in sorted {
        writer
            .write(DataPoint::new(series, time, value))
            .expect("Failed to write point");
    }
    writer.finish().expect("Failed to finish data file");
}

/// A handle for a file that is still being written: it has a name and a
/// time range but nothing on disk, and forks skip it.
pub fn open_resource(path: impl Into<PathBuf>, partition: i64, start: i64, end: i64) -> Arc<FileResource> {
    Arc::new(
        FileResource::new(
            path,
            PartitionId::new(partition),
            TimeRange::new(start, end),
            0,
        )
        .expect("Failed to create file resource"),
    )
}

/// A closed handle that does not need a file on disk.
pub fn sealed_resource(
    path: impl Into<PathBuf>,
    partition: i64,
    start: i64,
    end: i64,
    size: u64,
) -> Arc<FileResource> {
    let resource = FileResource::new(
        path,
        PartitionId::new(partition),
        TimeRange::new(start, end),
        size,
    )
    .expect("Failed to create file resource");
    resource.close();
    Arc::new(resource)
}
