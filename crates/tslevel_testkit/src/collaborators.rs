//! Recording and fault-injecting collaborators.
//!
//! These stand in for the query-side caches, the reader pool, the merge
//! writer and the selector so tests can count calls and force failures at
//! chosen points of a cycle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tslevel_core::{
    CacheInvalidator, Collaborators, CoreError, CoreResult, FileMerger, FileModificationStore,
    FileResource, LocalFileMerger, MergeOutput, MergeRequest, MergeSelector, ReaderManager,
    Selection, TsFileName,
};

/// A cache that records every invalidation.
#[derive(Debug, Default)]
pub struct RecordingCache {
    calls: Mutex<HashMap<PathBuf, usize>>,
}

impl RecordingCache {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invalidations seen for `path`.
    pub fn count(&self, path: &Path) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }

    /// Number of invalidations seen in total.
    pub fn total(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl CacheInvalidator for RecordingCache {
    fn invalidate_path(&self, path: &Path) {
        *self.calls.lock().entry(path.to_path_buf()).or_insert(0) += 1;
    }
}

/// A reader manager that records every eviction.
#[derive(Debug, Default)]
pub struct RecordingReaders {
    evicted: Mutex<Vec<PathBuf>>,
}

impl RecordingReaders {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths evicted so far, in call order.
    pub fn evicted(&self) -> Vec<PathBuf> {
        self.evicted.lock().clone()
    }
}

impl ReaderManager for RecordingReaders {
    fn close_and_evict(&self, path: &Path) {
        self.evicted.lock().push(path.to_path_buf());
    }
}

/// Handles on the recorders inside [`recording_collaborators`].
#[derive(Debug, Clone)]
pub struct Recorders {
    /// First query cache.
    pub chunk_cache: Arc<RecordingCache>,
    /// Second query cache.
    pub metadata_cache: Arc<RecordingCache>,
    /// Reader manager.
    pub readers: Arc<RecordingReaders>,
}

/// Local merger and `.mods` store with two recording caches and a
/// recording reader manager.
pub fn recording_collaborators() -> (Collaborators, Recorders) {
    with_merger(Arc::new(LocalFileMerger::new()))
}

/// Like [`recording_collaborators`], with a custom merger.
pub fn with_merger(merger: Arc<dyn FileMerger>) -> (Collaborators, Recorders) {
    let recorders = Recorders {
        chunk_cache: Arc::new(RecordingCache::new()),
        metadata_cache: Arc::new(RecordingCache::new()),
        readers: Arc::new(RecordingReaders::new()),
    };
    let chunk_cache: Arc<dyn CacheInvalidator> = recorders.chunk_cache.clone();
    let metadata_cache: Arc<dyn CacheInvalidator> = recorders.metadata_cache.clone();
    let collaborators = Collaborators {
        merger,
        modifications: Arc::new(FileModificationStore),
        caches: vec![chunk_cache, metadata_cache],
        readers: recorders.readers.clone(),
    };
    (collaborators, recorders)
}

/// A merger that always fails.
///
/// With `partial_output` set it first writes a few bytes at the target
/// path, the way a writer interrupted mid-file would.
#[derive(Debug, Default)]
pub struct FailingMerger {
    partial_output: bool,
    calls: AtomicUsize,
}

impl FailingMerger {
    /// Fails without touching the disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaves a partial target behind before failing.
    pub fn with_partial_output() -> Self {
        Self {
            partial_output: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of merges attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FileMerger for FailingMerger {
    fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<MergeOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.partial_output {
            if let Some(dir) = request.target.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(request.target, b"TSLF partial")?;
        }
        Err(CoreError::merge_failed("injected merge failure"))
    }
}

type MergeHook = Box<dyn Fn(&MergeRequest<'_>) + Send + Sync>;

/// Runs the local merger, calling hooks around it.
///
/// `before` runs once the sources' modifications have been read; `after`
/// runs once the targets are written. Tests use them to record deletions
/// that race a merge or to hold a merge open.
pub struct HookMerger {
    inner: LocalFileMerger,
    before: Option<MergeHook>,
    after: Option<MergeHook>,
}

impl HookMerger {
    /// A merger with no hooks.
    pub fn new() -> Self {
        Self {
            inner: LocalFileMerger::new(),
            before: None,
            after: None,
        }
    }

    /// Sets the hook run before writing.
    #[must_use]
    pub fn before(mut self, hook: impl Fn(&MergeRequest<'_>) + Send + Sync + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    /// Sets the hook run after writing.
    #[must_use]
    pub fn after(mut self, hook: impl Fn(&MergeRequest<'_>) + Send + Sync + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }
}

impl Default for HookMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMerger")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

impl FileMerger for HookMerger {
    fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<MergeOutput> {
        if let Some(hook) = &self.before {
            hook(request);
        }
        let output = self.inner.merge(request)?;
        if let Some(hook) = &self.after {
            hook(request);
        }
        Ok(output)
    }
}

/// A selector that always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSelector;

impl MergeSelector for FailingSelector {
    fn select(
        &self,
        _budget: u64,
        _sequence: &[Arc<FileResource>],
        _unsequence: &[Arc<FileResource>],
    ) -> CoreResult<Selection> {
        Err(CoreError::selection_failed("injected selection failure"))
    }
}

/// The target name a cycle derives from its first sequence source.
pub fn expected_target(first_sequence: &FileResource) -> PathBuf {
    let dir = first_sequence
        .path()
        .parent()
        .expect("Data file has no parent directory");
    first_sequence
        .name()
        .with_incremented_merge_count()
        .in_dir(dir)
}

/// Name of the `n`th split output of a merge into `target`.
pub fn split_name(target: &Path, n: u32) -> PathBuf {
    let dir = target.parent().expect("Target has no parent directory");
    TsFileName::from_path(target)
        .expect("Target name does not parse")
        .with_split(n)
        .in_dir(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_cache_counts_per_path() {
        let cache = RecordingCache::new();
        let a = Path::new("/sg/sequence/0/1-1-0.tsfile");
        let b = Path::new("/sg/sequence/0/2-1-0.tsfile");
        cache.invalidate_path(a);
        cache.invalidate_path(a);
        cache.invalidate_path(b);
        assert_eq!(cache.count(a), 2);
        assert_eq!(cache.count(b), 1);
        assert_eq!(cache.total(), 3);
    }

    #[test]
    fn test_recording_readers_keep_order() {
        let readers = RecordingReaders::new();
        readers.close_and_evict(Path::new("/a"));
        readers.close_and_evict(Path::new("/b"));
        assert_eq!(readers.evicted(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_failing_selector() {
        assert!(FailingSelector.select(u64::MAX, &[], &[]).is_err());
    }

    #[test]
    fn test_split_name() {
        let target = Path::new("/sg/sequence/0/1-1-1.tsfile");
        assert_eq!(split_name(target, 2), PathBuf::from("/sg/sequence/0/1-1-1-2.tsfile"));
    }
}
