//! Services the compaction manager calls out to.
//!
//! Each trait has a local implementation over `tslevel_storage`. Tests swap
//! in recording or failing versions.

use crate::compaction::LocalFileMerger;
use crate::error::CoreResult;
use crate::resource::FileResource;
use std::path::Path;
use std::sync::Arc;
use tslevel_storage::{MetadataCache, Modification, ModificationFile, ReaderPool};

/// Access to per-file tombstones.
pub trait ModificationStore: Send + Sync {
    /// Reads every modification recorded against `data_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the modification file cannot be read.
    fn read(&self, data_path: &Path) -> CoreResult<Vec<Modification>>;

    /// Appends one modification to `data_path`'s modification file.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&self, data_path: &Path, modification: &Modification) -> CoreResult<()>;

    /// Removes `data_path`'s modification file. Missing files are fine.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and cannot be removed.
    fn remove(&self, data_path: &Path) -> CoreResult<()>;
}

/// Query-side cache keyed by data file path.
pub trait CacheInvalidator: Send + Sync {
    /// Drops anything cached for `path`. Safe on unknown paths.
    fn invalidate_path(&self, path: &Path);
}

/// Owner of open data file readers.
pub trait ReaderManager: Send + Sync {
    /// Closes and forgets the reader for `path`, if any.
    fn close_and_evict(&self, path: &Path);
}

/// What a merge produced.
#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    /// Sealed output files, primary target first.
    pub targets: Vec<Arc<FileResource>>,
    /// Modifications already applied to the merged data.
    pub applied: Vec<Modification>,
}

/// Input of one merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeRequest<'a> {
    /// Path of the primary target.
    pub target: &'a Path,
    /// Sources in merge order; later sources win on duplicate points.
    pub sources: &'a [Arc<FileResource>],
    /// Modifications of each source, parallel to `sources`.
    pub modifications: &'a [Vec<Modification>],
    /// Size at which an output is cut and the next one started.
    pub target_file_size: u64,
}

/// Writes merged data files.
pub trait FileMerger: Send + Sync {
    /// Merges `request.sources` into one or more new files.
    ///
    /// # Errors
    ///
    /// Returns an error if any source cannot be read or an output cannot
    /// be written. Outputs already written are left for recovery to remove.
    fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<MergeOutput>;
}

/// [`ModificationStore`] over `.mods` files next to each data file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileModificationStore;

impl ModificationStore for FileModificationStore {
    fn read(&self, data_path: &Path) -> CoreResult<Vec<Modification>> {
        Ok(ModificationFile::for_data_file(data_path).read_all()?)
    }

    fn append(&self, data_path: &Path, modification: &Modification) -> CoreResult<()> {
        let mut file = ModificationFile::for_data_file(data_path);
        file.append(modification)?;
        file.sync()?;
        Ok(())
    }

    fn remove(&self, data_path: &Path) -> CoreResult<()> {
        ModificationFile::for_data_file(data_path).remove()?;
        Ok(())
    }
}

impl CacheInvalidator for MetadataCache {
    fn invalidate_path(&self, path: &Path) {
        self.invalidate(path);
    }
}

impl ReaderManager for ReaderPool {
    fn close_and_evict(&self, path: &Path) {
        ReaderPool::close_and_evict(self, path);
    }
}

/// The set of services one compaction manager uses.
#[derive(Clone)]
pub struct Collaborators {
    /// Writes merge outputs.
    pub merger: Arc<dyn FileMerger>,
    /// Reads and writes tombstones.
    pub modifications: Arc<dyn ModificationStore>,
    /// Caches to invalidate when a file is removed.
    pub caches: Vec<Arc<dyn CacheInvalidator>>,
    /// Open readers to close when a file is removed.
    pub readers: Arc<dyn ReaderManager>,
}

impl Collaborators {
    /// Local tsfile merger and `.mods` files, with the given reader pool
    /// and header cache.
    pub fn local(readers: Arc<ReaderPool>, cache: Arc<MetadataCache>) -> Self {
        let cache: Arc<dyn CacheInvalidator> = cache;
        Self {
            merger: Arc::new(LocalFileMerger::new()),
            modifications: Arc::new(FileModificationStore),
            caches: vec![cache],
            readers,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("caches", &self.caches.len())
            .finish_non_exhaustive()
    }
}
