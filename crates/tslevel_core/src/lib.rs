//! # tslevel Core
//!
//! Level-based compaction for a time-series storage group.
//!
//! Data files live in two axes: sequence files, whose time ranges do not
//! overlap within a partition, and unsequence files, which may overlap
//! anything. Each file sits at the level given by how many merges produced
//! it. A compaction cycle merges the level-0 sequence files of a partition
//! with one unsequence file into a new sequence file one level up.
//!
//! This crate provides:
//! - [`LevelRegistry`] - per-partition level buckets behind one reader/writer lock
//! - [`MergeSelector`] / [`SelectorKind`] - budget-aware merge candidate selection
//! - [`CompactionManager`] - the fork, select, merge, swap and cleanup cycle
//! - [`CompactionLogger`] / [`RecoveryController`] - crash-safe merge bookkeeping
//! - [`StorageGroupDir`] - directory layout, locking and startup scan
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use tslevel_core::{Collaborators, CompactionConfig, CompactionManager, StorageGroupDir};
//! use tslevel_storage::{MetadataCache, ReaderPool};
//!
//! let dir = StorageGroupDir::open(Path::new("/var/lib/tslevel/root.sg1"), "root.sg1", true)?;
//! let collaborators =
//!     Collaborators::local(Arc::new(ReaderPool::new()), Arc::new(MetadataCache::new()));
//! let manager = CompactionManager::open(&dir, CompactionConfig::default(), collaborators)?;
//! for (partition, outcome) in manager.run_all() {
//!     println!("{partition}: {outcome:?}");
//! }
//! # Ok::<(), tslevel_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collaborators;
mod compaction;
mod config;
mod dir;
mod error;
mod naming;
mod ordering;
mod registry;
mod resource;
mod selector;
mod stats;
mod types;

pub use collaborators::{
    CacheInvalidator, Collaborators, FileMerger, FileModificationStore, MergeOutput, MergeRequest,
    ModificationStore, ReaderManager,
};
pub use compaction::{
    carry_modifications, decode_records, remove_source_modifications, CancelHandle,
    CompactionLogAnalyzer, CompactionLogSummary, CompactionLogger, CompactionManager,
    CycleOutcome, LocalFileMerger, LogRecord, LogRecordType, RecoveryController, RecoveryReport,
    COMPACTION_LOG_SUFFIX, LOG_MAGIC,
};
pub use config::CompactionConfig;
pub use dir::{ScannedFiles, StorageGroupDir, SEQUENCE_DIR, UNSEQUENCE_DIR};
pub use error::{CoreError, CoreResult};
pub use naming::{deleted_path, is_deleted_name, TsFileName, TSFILE_SUFFIX};
pub use ordering::OrderKey;
pub use registry::{ForkedSnapshot, LevelRegistry};
pub use resource::FileResource;
pub use selector::{MergeSelector, Selection, SelectorKind};
pub use stats::{CompactionStats, StatsSnapshot};
pub use types::{PartitionId, TimeRange};
