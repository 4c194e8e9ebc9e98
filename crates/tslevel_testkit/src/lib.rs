//! # tslevel Testkit
//!
//! Test utilities for tslevel.
//!
//! This crate provides:
//! - Temporary storage groups with data file builders
//! - Recording and fault-injecting collaborators
//! - Property-based test generators using proptest
//!
//! The cross-crate scenario tests live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tslevel_testkit::prelude::*;
//!
//! #[test]
//! fn merges_level_zero() {
//!     let group = TestStorageGroup::new("sg");
//!     group.write_series(true, 0, TsFileName::new(1, 1, 0), 0..10);
//!     group.write_series(false, 0, TsFileName::new(2, 1, 0), 5..15);
//!     let (collaborators, recorders) = recording_collaborators();
//!     let manager = group.open_manager(CompactionConfig::default(), collaborators);
//!     assert!(manager.run_cycle(PartitionId::new(0)).is_merged());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use tslevel_core::{
        CompactionConfig, CompactionManager, CycleOutcome, FileResource, LevelRegistry,
        PartitionId, SelectorKind, TsFileName,
    };
}

pub use collaborators::*;
pub use fixtures::*;
pub use generators::*;
