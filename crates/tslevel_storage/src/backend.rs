//! Append-only log backend trait.

use crate::error::StorageResult;

/// An append-only byte log.
///
/// Tombstone files and the compaction log are both append-only records
/// that are read back in full and then discarded as a whole. This trait
/// captures exactly that lifecycle; it does not interpret the bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended so far, in order
/// - `sync` makes all appended bytes durable
/// - after `remove`, `exists` is false and `read_all` is empty
pub trait LogBackend: Send + Sync {
    /// Reads the whole log.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log, creating it if needed.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Syncs all appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current length of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Returns whether the log currently exists.
    fn exists(&self) -> bool;

    /// Deletes the log. Removing a log that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying file cannot be deleted.
    fn remove(&mut self) -> StorageResult<()>;
}
