//! Tombstone (modification) files.
//!
//! Every data file may carry a sibling `<file>.mods` holding the deletions
//! recorded against it after it was sealed. The file is line oriented and
//! append-only:
//!
//! ```text
//! DELETION,<file_offset>,<start_time>,<end_time>,<series>
//! ```
//!
//! `file_offset` is the data file length at the time of the deletion, so a
//! reader can tell which chunks predate it. Once a deletion has been moved
//! onto a merged file the physical offsets no longer line up, and the offset
//! is set to [`UNBOUNDED_OFFSET`] meaning "applies to every chunk".

use crate::backend::LogBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileLog;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix appended to a data file path to locate its modification file.
pub const MODS_SUFFIX: &str = ".mods";

/// Offset marking a deletion that applies to the whole file.
pub const UNBOUNDED_OFFSET: u64 = u64::MAX;

const DELETION_TAG: &str = "DELETION";

/// A deletion of a time range of one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Modification {
    /// Series the deletion applies to.
    pub series: String,
    /// First deleted timestamp (inclusive).
    pub start: i64,
    /// Last deleted timestamp (inclusive).
    pub end: i64,
    /// Data file length when the deletion was recorded.
    pub file_offset: u64,
}

impl Modification {
    /// Creates a deletion of `series` over `start..=end`.
    pub fn deletion(series: impl Into<String>, start: i64, end: i64, file_offset: u64) -> Self {
        Self {
            series: series.into(),
            start,
            end,
            file_offset,
        }
    }

    /// Returns true if this deletion removes the given sample.
    #[must_use]
    pub fn covers(&self, series: &str, time: i64) -> bool {
        self.series == series && self.start <= time && time <= self.end
    }

    /// Returns true if both records delete the same series and range,
    /// regardless of the offset they were recorded at.
    #[must_use]
    pub fn same_predicate(&self, other: &Self) -> bool {
        self.series == other.series && self.start == other.start && self.end == other.end
    }

    /// Returns a copy whose offset is [`UNBOUNDED_OFFSET`].
    #[must_use]
    pub fn unbounded(&self) -> Self {
        Self {
            file_offset: UNBOUNDED_OFFSET,
            ..self.clone()
        }
    }

    fn encode_line(&self) -> String {
        format!(
            "{DELETION_TAG},{},{},{},{}\n",
            self.file_offset, self.start, self.end, self.series
        )
    }

    fn decode_line(line: &str, line_no: usize) -> StorageResult<Self> {
        let invalid = |reason: &str| StorageError::InvalidModification {
            line: line_no,
            reason: reason.to_string(),
        };

        let mut fields = line.splitn(5, ',');
        match fields.next() {
            Some(DELETION_TAG) => {}
            Some(other) => return Err(invalid(&format!("unknown record type {other}"))),
            None => return Err(invalid("empty record")),
        }
        let file_offset = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| invalid("bad file offset"))?;
        let start = fields
            .next()
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| invalid("bad start time"))?;
        let end = fields
            .next()
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| invalid("bad end time"))?;
        let series = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing series"))?;

        Ok(Self::deletion(series, start, end, file_offset))
    }
}

/// Returns the modification file path belonging to a data file.
#[must_use]
pub fn mods_path_for(data_path: &Path) -> PathBuf {
    let mut name = OsString::from(data_path.as_os_str());
    name.push(MODS_SUFFIX);
    PathBuf::from(name)
}

/// The modification file of one data file.
pub struct ModificationFile {
    data_path: PathBuf,
    log: Box<dyn LogBackend>,
}

impl ModificationFile {
    /// Opens the on-disk modification file of `data_path`.
    ///
    /// The file is created lazily on the first append.
    #[must_use]
    pub fn for_data_file(data_path: &Path) -> Self {
        let log = FileLog::new(&mods_path_for(data_path));
        Self::with_backend(data_path, Box::new(log))
    }

    /// Wraps an arbitrary backend, e.g. [`crate::MemoryLog`] in tests.
    #[must_use]
    pub fn with_backend(data_path: &Path, log: Box<dyn LogBackend>) -> Self {
        Self {
            data_path: data_path.to_path_buf(),
            log,
        }
    }

    /// Returns the data file this modification file belongs to.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Returns true if any modification was ever recorded.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.log.exists()
    }

    /// Reads every recorded modification in append order.
    ///
    /// A trailing line without a newline is a torn append and is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or an unparsable complete line.
    pub fn read_all(&self) -> StorageResult<Vec<Modification>> {
        let data = self.log.read_all()?;
        let text = String::from_utf8_lossy(&data);
        let complete = match text.rfind('\n') {
            Some(end) => &text[..=end],
            None => "",
        };
        complete
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| Modification::decode_line(line.trim_end(), idx + 1))
            .collect()
    }

    /// Appends one modification.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append(&mut self, modification: &Modification) -> StorageResult<()> {
        self.log.append(modification.encode_line().as_bytes())?;
        Ok(())
    }

    /// Makes all appended modifications durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.log.sync()
    }

    /// Deletes the modification file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&mut self) -> StorageResult<()> {
        self.log.remove()
    }
}

impl std::fmt::Debug for ModificationFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModificationFile")
            .field("data_path", &self.data_path)
            .field("exists", &self.exists())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryLog;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn mods_path_appends_suffix() {
        let path = mods_path_for(Path::new("/data/seq/0/1-1-0.tsfile"));
        assert_eq!(path, PathBuf::from("/data/seq/0/1-1-0.tsfile.mods"));
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("1-1-0.tsfile");
        let mut mods = ModificationFile::for_data_file(&data);
        assert!(!mods.exists());

        let first = Modification::deletion("root.sg.d1.s1", 0, 100, 42);
        let second = Modification::deletion("root.sg.d1.s2", 5, 6, 42);
        mods.append(&first).unwrap();
        mods.append(&second).unwrap();
        mods.sync().unwrap();

        let reopened = ModificationFile::for_data_file(&data);
        assert_eq!(reopened.read_all().unwrap(), vec![first, second]);
    }

    #[test]
    fn series_may_contain_commas() {
        let mut mods = ModificationFile::with_backend(Path::new("x"), Box::new(MemoryLog::new()));
        let m = Modification::deletion("root.sg.`a,b`", -5, 5, UNBOUNDED_OFFSET);
        mods.append(&m).unwrap();
        assert_eq!(mods.read_all().unwrap(), vec![m]);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let log = MemoryLog::with_data(b"DELETION,1,0,10,s1\nDELETION,2,0".to_vec());
        let mods = ModificationFile::with_backend(Path::new("x"), Box::new(log));

        let read = mods.read_all().unwrap();
        assert_eq!(read, vec![Modification::deletion("s1", 0, 10, 1)]);
    }

    #[test]
    fn garbage_line_is_an_error() {
        let log = MemoryLog::with_data(b"UPSERT,1,0,10,s1\n".to_vec());
        let mods = ModificationFile::with_backend(Path::new("x"), Box::new(log));

        assert!(matches!(
            mods.read_all(),
            Err(StorageError::InvalidModification { line: 1, .. })
        ));
    }

    #[test]
    fn predicate_ignores_offset() {
        let a = Modification::deletion("s1", 1, 2, 10);
        let b = a.unbounded();
        assert_ne!(a, b);
        assert!(a.same_predicate(&b));
        assert!(a.covers("s1", 2));
        assert!(!a.covers("s1", 3));
        assert!(!a.covers("s2", 1));
    }

    proptest! {
        #[test]
        fn records_survive_any_series_name(
            series in "[a-z0-9.,`_]{1,24}",
            start in -1_000i64..1_000,
            len in 0i64..1_000,
            offset in any::<u64>(),
        ) {
            let mut mods = ModificationFile::with_backend(Path::new("x"), Box::new(MemoryLog::new()));
            let m = Modification::deletion(series.clone(), start, start + len, offset);
            mods.append(&m).unwrap();

            let read = mods.read_all().unwrap();
            prop_assert_eq!(read.len(), 1);
            prop_assert!(read[0].same_predicate(&m));
            prop_assert_eq!(read[0].file_offset, offset);
            prop_assert!(read[0].covers(&series, start + len));
            prop_assert!(!read[0].covers(&series, start + len + 1));
        }
    }
}
