//! Compaction statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = manager.stats().snapshot();
//! println!("merged cycles: {}", stats.cycles_merged);
//! println!("files merged: {}", stats.files_merged);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one compaction manager.
///
/// All counters are atomic and can be read while a cycle is running.
#[derive(Debug, Default)]
pub struct CompactionStats {
    // Cycle outcomes
    cycles_started: AtomicU64,
    cycles_merged: AtomicU64,
    cycles_no_candidate: AtomicU64,
    cycles_failed: AtomicU64,

    // Volume
    files_merged: AtomicU64,
    files_produced: AtomicU64,
    bytes_merged: AtomicU64,
    tombstones_carried: AtomicU64,

    // Recovery
    restores: AtomicU64,
}

impl CompactionStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cycle_start(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge(&self, sources: usize, bytes: u64, produced: usize, tombstones: usize) {
        self.cycles_merged.fetch_add(1, Ordering::Relaxed);
        self.files_merged.fetch_add(sources as u64, Ordering::Relaxed);
        self.bytes_merged.fetch_add(bytes, Ordering::Relaxed);
        self.files_produced.fetch_add(produced as u64, Ordering::Relaxed);
        self.tombstones_carried.fetch_add(tombstones as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_no_candidate(&self) {
        self.cycles_no_candidate.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restore(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }

    /// Cycles that made it past the working-flag check.
    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::Relaxed)
    }

    /// Cycles that committed a merge.
    pub fn cycles_merged(&self) -> u64 {
        self.cycles_merged.load(Ordering::Relaxed)
    }

    /// Cycles that failed or were cancelled.
    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_merged: self.cycles_merged.load(Ordering::Relaxed),
            cycles_no_candidate: self.cycles_no_candidate.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            files_merged: self.files_merged.load(Ordering::Relaxed),
            files_produced: self.files_produced.load(Ordering::Relaxed),
            bytes_merged: self.bytes_merged.load(Ordering::Relaxed),
            tombstones_carried: self.tombstones_carried.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`CompactionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Cycles that made it past the working-flag check.
    pub cycles_started: u64,
    /// Cycles that committed a merge.
    pub cycles_merged: u64,
    /// Cycles that found nothing to merge.
    pub cycles_no_candidate: u64,
    /// Cycles that failed or were cancelled.
    pub cycles_failed: u64,
    /// Source files merged away.
    pub files_merged: u64,
    /// Target files produced.
    pub files_produced: u64,
    /// Bytes of source data merged.
    pub bytes_merged: u64,
    /// Deletions carried onto targets.
    pub tombstones_carried: u64,
    /// Restores run after failed cycles or at startup.
    pub restores: u64,
}
