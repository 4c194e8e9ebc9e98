//! In-memory append log for testing.

use crate::backend::LogBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory [`LogBackend`].
///
/// Clones share the same buffer, so a test can keep one handle to inspect
/// what another component wrote, or pre-seed a log with bytes to simulate
/// a crash that left a partially written record behind.
///
/// # Example
///
/// ```rust
/// use tslevel_storage::{LogBackend, MemoryLog};
///
/// let mut log = MemoryLog::new();
/// let view = log.clone();
/// log.append(b"abc").unwrap();
/// assert_eq!(view.read_all().unwrap(), b"abc");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    data: Arc<RwLock<Option<Vec<u8>>>>,
}

impl MemoryLog {
    /// Creates a new log that does not exist yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log holding pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(Some(data))),
        }
    }

    /// Replaces the log contents, e.g. to truncate a record mid-way.
    pub fn set_data(&self, data: Vec<u8>) {
        *self.data.write() = Some(data);
    }
}

impl LogBackend for MemoryLog {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone().unwrap_or_default())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut guard = self.data.write();
        let buf = guard.get_or_insert_with(Vec::new);
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().as_ref().map_or(0, |d| d.len() as u64))
    }

    fn exists(&self) -> bool {
        self.data.read().is_some()
    }

    fn remove(&mut self) -> StorageResult<()> {
        *self.data.write() = None;
        Ok(())
    }
}
