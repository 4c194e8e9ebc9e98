//! Carrying deletions from merge sources onto merge targets.

use crate::collaborators::ModificationStore;
use crate::error::{CoreError, CoreResult};
use crate::resource::FileResource;
use std::sync::Arc;
use tslevel_storage::Modification;

/// Copies the deletions of `sources` onto every target.
///
/// Records whose predicate matches one in `applied` were already honoured
/// by the merge and are skipped; the rest are written with the unbounded
/// offset, since post-merge offsets do not map back to source offsets.
/// Identical predicates recorded on several sources are written once.
/// Returns the number of deletions carried.
///
/// # Errors
///
/// Returns an error if a source cannot be read or a target cannot be written.
pub fn carry_modifications(
    store: &dyn ModificationStore,
    sources: &[Arc<FileResource>],
    targets: &[Arc<FileResource>],
    applied: &[Modification],
) -> CoreResult<usize> {
    let mut remaining: Vec<Modification> = Vec::new();
    for source in sources {
        for modification in store.read(source.path())? {
            let known = applied
                .iter()
                .chain(&remaining)
                .any(|m| m.same_predicate(&modification));
            if !known {
                remaining.push(modification.unbounded());
            }
        }
    }

    for target in targets {
        for modification in &remaining {
            store.append(target.path(), modification)?;
        }
    }
    Ok(remaining.len())
}

/// Deletes the modification files of merged-away sources.
///
/// Failures are collected rather than stopping at the first one.
pub fn remove_source_modifications(
    store: &dyn ModificationStore,
    sources: &[Arc<FileResource>],
) -> Vec<(Arc<FileResource>, CoreError)> {
    sources
        .iter()
        .filter_map(|source| {
            store
                .remove(source.path())
                .err()
                .map(|err| (Arc::clone(source), err))
        })
        .collect()
}
