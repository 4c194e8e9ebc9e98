//! File-based append log.

use crate::backend::LogBackend;
use crate::error::StorageResult;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A file-backed [`LogBackend`].
///
/// The file is opened lazily on the first append, so constructing a
/// `FileLog` for a path that has no log yet leaves the filesystem
/// untouched. Readers of a missing log see an empty byte sequence.
///
/// # Example
///
/// ```no_run
/// use tslevel_storage::{FileLog, LogBackend};
/// use std::path::Path;
///
/// let mut log = FileLog::new(Path::new("sg.compaction.log"));
/// log.append(b"record").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Option<File>,
}

impl FileLog {
    /// Creates a log handle for `path` without touching the filesystem.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
        }
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&mut self) -> StorageResult<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
            }
        };
        Ok(self.file.insert(file))
    }
}

impl LogBackend for FileLog {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size()?;
        if data.is_empty() {
            return Ok(offset);
        }
        let file = self.handle()?;
        file.write_all(data)?;
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn remove(&mut self) -> StorageResult<()> {
        self.file = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempdir().unwrap();
        let log = FileLog::new(&dir.path().join("absent.log"));

        assert!(!log.exists());
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn append_creates_file_and_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("a.log");
        let mut log = FileLog::new(&path);

        assert_eq!(log.append(b"hello").unwrap(), 0);
        assert_eq!(log.append(b" world").unwrap(), 5);
        log.sync().unwrap();

        assert!(path.exists());
        assert_eq!(log.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn reopen_appends_after_existing_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.log");

        {
            let mut log = FileLog::new(&path);
            log.append(b"first").unwrap();
            log.sync().unwrap();
        }

        let mut log = FileLog::new(&path);
        assert_eq!(log.append(b"second").unwrap(), 5);
        assert_eq!(log.read_all().unwrap(), b"firstsecond");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::new(&dir.path().join("a.log"));
        log.append(b"x").unwrap();

        log.remove().unwrap();
        assert!(!log.exists());
        log.remove().unwrap();
    }
}
