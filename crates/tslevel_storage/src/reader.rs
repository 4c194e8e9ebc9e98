//! Shared reader pool and header cache.
//!
//! Queries open data files through a [`ReaderPool`] and look up time
//! ranges through a [`MetadataCache`]. Both are keyed by path, and both
//! must forget a path before the file behind it is renamed away.

use crate::error::StorageResult;
use crate::tsfile::{TsFileMeta, TsFileReader};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pool of opened, verified data files.
#[derive(Debug, Default)]
pub struct ReaderPool {
    readers: Mutex<HashMap<PathBuf, Arc<TsFileReader>>>,
}

impl ReaderPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the reader for `path`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or verified.
    pub fn get(&self, path: &Path) -> StorageResult<Arc<TsFileReader>> {
        let mut readers = self.readers.lock();
        if let Some(reader) = readers.get(path) {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(TsFileReader::open(path)?);
        readers.insert(path.to_path_buf(), Arc::clone(&reader));
        Ok(reader)
    }

    /// Drops the reader for `path`. Returns whether one was open.
    pub fn close_and_evict(&self, path: &Path) -> bool {
        self.readers.lock().remove(path).is_some()
    }

    /// Returns true if a reader for `path` is open.
    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.readers.lock().contains_key(path)
    }

    /// Number of open readers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readers.lock().len()
    }

    /// Returns true if no reader is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache of data file headers.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<PathBuf, TsFileMeta>>,
}

impl MetadataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the header of `path`, reading it on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be read.
    pub fn get_or_load(&self, path: &Path) -> StorageResult<TsFileMeta> {
        if let Some(meta) = self.entries.read().get(path) {
            return Ok(*meta);
        }
        let meta = TsFileReader::read_meta(path)?;
        self.entries.write().insert(path.to_path_buf(), meta);
        Ok(meta)
    }

    /// Forgets `path`. Returns whether an entry was present.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.write().remove(path).is_some()
    }

    /// Number of cached headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsfile::{DataPoint, TsFileWriter};
    use tempfile::tempdir;

    fn make_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut writer = TsFileWriter::new(&path);
        writer.write(DataPoint::new("s1", 7, 1.5)).unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn pool_reuses_open_reader() {
        let dir = tempdir().unwrap();
        let path = make_file(dir.path(), "1-1-0.tsfile");
        let pool = ReaderPool::new();

        let a = pool.get(&path).unwrap();
        let b = pool.get(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn evict_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = make_file(dir.path(), "1-1-0.tsfile");
        let pool = ReaderPool::new();
        pool.get(&path).unwrap();

        assert!(pool.close_and_evict(&path));
        assert!(!pool.close_and_evict(&path));
        assert!(!pool.close_and_evict(Path::new("/never/opened")));
        assert!(pool.is_empty());
    }

    #[test]
    fn metadata_cache_invalidation() {
        let dir = tempdir().unwrap();
        let path = make_file(dir.path(), "1-1-0.tsfile");
        let cache = MetadataCache::new();

        assert_eq!(cache.get_or_load(&path).unwrap().min_time, 7);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&path));
        assert!(!cache.invalidate(&path));
        assert!(cache.is_empty());
    }
}
