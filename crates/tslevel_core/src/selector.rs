//! Merge candidate selection.
//!
//! A selector narrows the forked level-0 files down to the set one merge
//! will rewrite. Selectors are pure: they see only the snapshot slices they
//! are given, never the live registry. The estimated cost of a file is its
//! on-disk size.

use crate::error::CoreResult;
use crate::resource::FileResource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Files chosen for one merge.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Sequence sources, in level order.
    pub sequence: Vec<Arc<FileResource>>,
    /// Unsequence sources, in level order.
    pub unsequence: Vec<Arc<FileResource>>,
}

impl Selection {
    /// Returns true if nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty() && self.unsequence.is_empty()
    }

    /// Number of selected files on both axes.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.sequence.len() + self.unsequence.len()
    }

    /// Sum of the estimated costs of the selected files.
    #[must_use]
    pub fn estimated_cost(&self) -> u64 {
        total_size(&self.sequence).saturating_add(total_size(&self.unsequence))
    }

    /// Sources in merge order: sequence files, then unsequence files.
    #[must_use]
    pub fn sources(&self) -> Vec<Arc<FileResource>> {
        self.sequence.iter().chain(&self.unsequence).cloned().collect()
    }
}

/// Chooses merge sources under a cost budget.
pub trait MergeSelector: Send + Sync {
    /// Picks the subset of `sequence` and `unsequence` to merge together.
    ///
    /// # Errors
    ///
    /// Returns an error if selection cannot be performed; the caller treats
    /// that as "nothing to merge".
    fn select(
        &self,
        budget: u64,
        sequence: &[Arc<FileResource>],
        unsequence: &[Arc<FileResource>],
    ) -> CoreResult<Selection>;
}

/// Built-in selection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// Unsequence files first, then sequence files in order until the
    /// budget is used up.
    #[default]
    Budgeted,
    /// Sequence files overlapping the unsequence data, taken from the
    /// newest end, admitted only as a whole.
    Overlap,
}

impl MergeSelector for SelectorKind {
    fn select(
        &self,
        budget: u64,
        sequence: &[Arc<FileResource>],
        unsequence: &[Arc<FileResource>],
    ) -> CoreResult<Selection> {
        Ok(match self {
            Self::Budgeted => select_budgeted(budget, sequence, unsequence),
            Self::Overlap => select_overlapping(budget, sequence, unsequence),
        })
    }
}

fn total_size(files: &[Arc<FileResource>]) -> u64 {
    files.iter().fold(0u64, |acc, f| acc.saturating_add(f.size()))
}

fn select_budgeted(
    budget: u64,
    sequence: &[Arc<FileResource>],
    unsequence: &[Arc<FileResource>],
) -> Selection {
    let mut cost = total_size(unsequence);
    if cost > budget {
        return Selection::default();
    }

    let mut selected = Vec::new();
    for file in sequence {
        let next = cost.saturating_add(file.size());
        if next > budget {
            break;
        }
        cost = next;
        selected.push(Arc::clone(file));
    }

    Selection {
        sequence: selected,
        unsequence: unsequence.to_vec(),
    }
}

fn select_overlapping(
    budget: u64,
    sequence: &[Arc<FileResource>],
    unsequence: &[Arc<FileResource>],
) -> Selection {
    let Some(earliest) = unsequence.iter().map(|f| f.time_range().start).min() else {
        return Selection::default();
    };

    let overlapping = sequence
        .iter()
        .rev()
        .take_while(|f| f.time_range().end > earliest)
        .count();
    let selection = Selection {
        sequence: sequence[sequence.len() - overlapping..].to_vec(),
        unsequence: unsequence.to_vec(),
    };

    if selection.estimated_cost() > budget {
        Selection::default()
    } else {
        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartitionId, TimeRange};

    fn file(name: &str, start: i64, end: i64, size: u64) -> Arc<FileResource> {
        let path = format!("/sg/sequence/0/{name}");
        let file = FileResource::new(path, PartitionId::new(0), TimeRange::new(start, end), size).unwrap();
        file.close();
        Arc::new(file)
    }

    fn times(files: &[Arc<FileResource>]) -> Vec<u64> {
        files.iter().map(|f| f.name().time).collect()
    }

    #[test]
    fn budgeted_admits_everything_under_budget() {
        let seq = vec![file("1-1-0.tsfile", 0, 10, 10), file("2-1-0.tsfile", 11, 20, 10)];
        let unseq = vec![file("3-1-0.tsfile", 5, 15, 5)];

        let selection = SelectorKind::Budgeted.select(100, &seq, &unseq).unwrap();
        assert_eq!(times(&selection.sequence), vec![1, 2]);
        assert_eq!(times(&selection.unsequence), vec![3]);
        assert_eq!(selection.estimated_cost(), 25);
    }

    #[test]
    fn budgeted_stops_at_first_file_over_budget() {
        let seq = vec![
            file("1-1-0.tsfile", 0, 10, 10),
            file("2-1-0.tsfile", 11, 20, 50),
            file("3-1-0.tsfile", 21, 30, 1),
        ];
        let unseq = vec![file("4-1-0.tsfile", 5, 15, 5)];

        let selection = SelectorKind::Budgeted.select(20, &seq, &unseq).unwrap();
        assert_eq!(times(&selection.sequence), vec![1]);
    }

    #[test]
    fn budgeted_empty_when_unsequence_alone_too_big() {
        let seq = vec![file("1-1-0.tsfile", 0, 10, 1)];
        let unseq = vec![file("2-1-0.tsfile", 0, 10, 100)];
        assert!(SelectorKind::Budgeted.select(50, &seq, &unseq).unwrap().is_empty());
    }

    #[test]
    fn overlap_takes_newest_overlapping_run() {
        let seq = vec![
            file("1-1-0.tsfile", 0, 10, 1),
            file("2-1-0.tsfile", 11, 20, 1),
            file("3-1-0.tsfile", 21, 30, 1),
        ];
        let unseq = vec![file("4-1-0.tsfile", 15, 25, 1)];

        let selection = SelectorKind::Overlap.select(100, &seq, &unseq).unwrap();
        assert_eq!(times(&selection.sequence), vec![2, 3]);
        assert_eq!(times(&selection.unsequence), vec![4]);
    }

    #[test]
    fn overlap_is_all_or_nothing_under_budget() {
        let seq = vec![file("1-1-0.tsfile", 0, 10, 40), file("2-1-0.tsfile", 11, 20, 40)];
        let unseq = vec![file("3-1-0.tsfile", 0, 5, 40)];
        assert!(SelectorKind::Overlap.select(100, &seq, &unseq).unwrap().is_empty());
        assert_eq!(SelectorKind::Overlap.select(120, &seq, &unseq).unwrap().file_count(), 3);
    }

    #[test]
    fn overlap_without_unsequence_selects_nothing() {
        let seq = vec![file("1-1-0.tsfile", 0, 10, 1)];
        assert!(SelectorKind::Overlap.select(100, &seq, &[]).unwrap().is_empty());
    }

    #[test]
    fn sources_put_sequence_first() {
        let selection = Selection {
            sequence: vec![file("2-1-0.tsfile", 0, 1, 1)],
            unsequence: vec![file("1-1-0.tsfile", 0, 1, 1)],
        };
        assert_eq!(times(&selection.sources()), vec![2, 1]);
    }
}
