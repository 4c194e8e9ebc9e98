//! Data file naming.
//!
//! Data files are named `{create_time}-{version}-{merge_count}.tsfile`.
//! The merge count doubles as the file's level: a freshly flushed file has
//! count 0, and every merge that rewrites it produces a file with a count
//! one higher than its first sequence source. Extra outputs of a merge that
//! was split by size carry a fourth field, `{time}-{version}-{merge}-{split}`.
//!
//! A file removed from the registry is renamed to `<name>_<millis>` so that
//! readers which resolved the old path just before removal fail cleanly
//! instead of reading a reused name; such names never parse as live files.

use crate::error::{CoreError, CoreResult};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extension of live data files.
pub const TSFILE_SUFFIX: &str = ".tsfile";

/// Parsed name of a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TsFileName {
    /// Creation time in milliseconds.
    pub time: u64,
    /// Monotonic version within the storage group.
    pub version: u64,
    /// Number of merges this data has gone through.
    pub merge_count: u32,
    /// Index of an extra merge output, absent for the primary one.
    pub split: Option<u32>,
}

impl TsFileName {
    /// Creates the name of a freshly flushed file.
    #[must_use]
    pub const fn new(time: u64, version: u64, merge_count: u32) -> Self {
        Self {
            time,
            version,
            merge_count,
            split: None,
        }
    }

    /// Parses a bare file name such as `1700000000000-3-0.tsfile`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFileName`] if the name does not match
    /// the expected pattern.
    pub fn parse(name: &str) -> CoreResult<Self> {
        let stem = name
            .strip_suffix(TSFILE_SUFFIX)
            .ok_or_else(|| CoreError::invalid_file_name(name, "missing .tsfile suffix"))?;

        let fields: Vec<&str> = stem.split('-').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(CoreError::invalid_file_name(
                name,
                format!("expected 3 or 4 dash-separated fields, found {}", fields.len()),
            ));
        }

        let number = |field: &str, what: &str| -> CoreResult<u64> {
            if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CoreError::invalid_file_name(name, format!("{what} is not a number")));
            }
            field
                .parse::<u64>()
                .map_err(|_| CoreError::invalid_file_name(name, format!("{what} is out of range")))
        };

        let time = number(fields[0], "time")?;
        let version = number(fields[1], "version")?;
        let merge_count = u32::try_from(number(fields[2], "merge count")?)
            .map_err(|_| CoreError::invalid_file_name(name, "merge count is out of range"))?;
        let split = match fields.get(3) {
            Some(field) => Some(
                u32::try_from(number(field, "split index")?)
                    .map_err(|_| CoreError::invalid_file_name(name, "split index is out of range"))?,
            ),
            None => None,
        };

        Ok(Self {
            time,
            version,
            merge_count,
            split,
        })
    }

    /// Parses the file name component of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no UTF-8 file name or it does not parse.
    pub fn from_path(path: &Path) -> CoreResult<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CoreError::invalid_file_name(path.display().to_string(), "no file name"))?;
        Self::parse(name)
    }

    /// Name of the file a merge of this one produces.
    #[must_use]
    pub const fn with_incremented_merge_count(self) -> Self {
        Self {
            merge_count: self.merge_count.saturating_add(1),
            split: None,
            ..self
        }
    }

    /// Name of the `index`-th extra output of a split merge. Index 0 is
    /// the primary output itself.
    #[must_use]
    pub const fn with_split(self, index: u32) -> Self {
        Self {
            split: if index == 0 { None } else { Some(index) },
            ..self
        }
    }

    /// Returns true if both names belong to the outputs of the same merge.
    #[must_use]
    pub fn same_family(&self, other: &Self) -> bool {
        self.time == other.time
            && self.version == other.version
            && self.merge_count == other.merge_count
    }

    /// Returns `dir/<self>`.
    #[must_use]
    pub fn in_dir(&self, dir: &Path) -> PathBuf {
        dir.join(self.to_string())
    }
}

impl fmt::Display for TsFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.time, self.version, self.merge_count)?;
        if let Some(split) = self.split {
            write!(f, "-{split}")?;
        }
        f.write_str(TSFILE_SUFFIX)
    }
}

/// Path a mark-deleted file is renamed to.
#[must_use]
pub fn deleted_path(path: &Path, now_millis: u128) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!("_{now_millis}"));
    PathBuf::from(name)
}

/// Returns true if `name` is a mark-deleted data file.
#[must_use]
pub fn is_deleted_name(name: &str) -> bool {
    match name.rsplit_once('_') {
        Some((head, tail)) => {
            head.ends_with(TSFILE_SUFFIX)
                && !tail.is_empty()
                && tail.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_three_fields() {
        let name = TsFileName::parse("1700000000000-12-3.tsfile").unwrap();
        assert_eq!(name, TsFileName::new(1_700_000_000_000, 12, 3));
        assert_eq!(name.to_string(), "1700000000000-12-3.tsfile");
    }

    #[test]
    fn parse_split_field() {
        let name = TsFileName::parse("10-2-1-4.tsfile").unwrap();
        assert_eq!(name.split, Some(4));
        assert_eq!(name.to_string(), "10-2-1-4.tsfile");
    }

    #[test]
    fn rejects_bad_names() {
        for bad in [
            "10-2-1.tsf",
            "10-2.tsfile",
            "10-2-1-4-5.tsfile",
            "a-2-1.tsfile",
            "10--1.tsfile",
            "10-2-99999999999.tsfile",
            "10-2-+1.tsfile",
        ] {
            assert!(TsFileName::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn merge_count_increment_drops_split() {
        let name = TsFileName::parse("10-2-1-4.tsfile").unwrap();
        let next = name.with_incremented_merge_count();
        assert_eq!(next.to_string(), "10-2-2.tsfile");
    }

    #[test]
    fn split_family() {
        let base = TsFileName::new(10, 2, 1);
        let extra = base.with_split(2);
        assert_eq!(base.with_split(0), base);
        assert!(base.same_family(&extra));
        assert!(!base.same_family(&base.with_incremented_merge_count()));
    }

    #[test]
    fn from_path_uses_file_name() {
        let name = TsFileName::from_path(Path::new("/data/sequence/0/5-1-0.tsfile")).unwrap();
        assert_eq!(name, TsFileName::new(5, 1, 0));
    }

    #[test]
    fn deleted_names() {
        let path = deleted_path(Path::new("/d/5-1-0.tsfile"), 1234);
        assert_eq!(path, PathBuf::from("/d/5-1-0.tsfile_1234"));
        assert!(is_deleted_name("5-1-0.tsfile_1234"));
        assert!(!is_deleted_name("5-1-0.tsfile"));
        assert!(!is_deleted_name("5-1-0.tsfile_"));
        assert!(!is_deleted_name("5-1-0.tsfile.mods"));
        assert!(TsFileName::parse("5-1-0.tsfile_1234").is_err());
    }
}
