//! Total order of sequence files within one level.
//!
//! Data files live in numbered directories (data roots, partitions), and
//! files relocated across those directories by an earlier recovery must
//! still sort by directory number before any file name tie-break. The key
//! therefore compares, in order:
//!
//! 1. The numeric directory segments of the parent path, lexicographically
//!    and by value (`3` before `12`). Non-numeric segments take no part, so
//!    `/data/3/...` and `/mnt/data/3/...` agree on this component.
//! 2. The parsed file name: create time, version, merge count, split.
//! 3. The raw file name, then the full path.
//!
//! Every component is itself a total order, so the key is one too, and two
//! keys are equal only for the same path.
//!
//! Segments are parsed once when the key is built, not on every comparison.

use crate::error::CoreResult;
use crate::naming::TsFileName;
use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};

/// A numeric directory segment with leading zeros stripped.
///
/// Compared by digit count and then digit by digit, so values of any length
/// order by magnitude without overflowing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirNumber(String);

impl DirNumber {
    fn parse(segment: &str) -> Option<Self> {
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = segment.trim_start_matches('0');
        Some(Self(trimmed.to_string()))
    }
}

impl Ord for DirNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for DirNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Precomputed sort key of a sequence file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    dirs: Vec<DirNumber>,
    name: TsFileName,
    raw_name: String,
    path: PathBuf,
}

impl OrderKey {
    /// Builds the key for a data file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file name does not parse.
    pub fn for_path(path: &Path) -> CoreResult<Self> {
        let name = TsFileName::from_path(path)?;
        let raw_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dirs = path
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .filter_map(|component| match component {
                        Component::Normal(s) => DirNumber::parse(&s.to_string_lossy()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            dirs,
            name,
            raw_name,
            path: path.to_path_buf(),
        })
    }

    /// Parsed file name.
    #[must_use]
    pub const fn name(&self) -> &TsFileName {
        &self.name
    }
}
