//! Compaction configuration.

use crate::error::{CoreError, CoreResult};
use crate::selector::SelectorKind;
use serde::{Deserialize, Serialize};

/// Configuration for one storage group's compaction manager.
///
/// Passed explicitly to the registry and orchestrator at construction;
/// nothing in the algorithms reads ambient settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Number of levels per partition. Files whose merge count reaches or
    /// exceeds this are pinned to the last level.
    pub max_level_num: usize,

    /// Upper bound on the estimated cost of one merge, in bytes.
    pub merge_memory_budget: u64,

    /// Size at which a merge output is cut and a new target started.
    pub target_file_size: u64,

    /// Whether unsequence files are merged into sequence level 0.
    pub enable_unseq_compaction: bool,

    /// Strategy used to narrow forked files to a merge selection.
    pub selector: SelectorKind,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_level_num: 4,
            merge_memory_budget: 512 * 1024 * 1024, // 512 MB
            target_file_size: 64 * 1024 * 1024,     // 64 MB
            enable_unseq_compaction: true,
            selector: SelectorKind::Budgeted,
        }
    }
}

impl CompactionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of levels.
    #[must_use]
    pub const fn max_level_num(mut self, value: usize) -> Self {
        self.max_level_num = value;
        self
    }

    /// Sets the merge budget in bytes.
    #[must_use]
    pub const fn merge_memory_budget(mut self, bytes: u64) -> Self {
        self.merge_memory_budget = bytes;
        self
    }

    /// Sets the merge output split size in bytes.
    #[must_use]
    pub const fn target_file_size(mut self, bytes: u64) -> Self {
        self.target_file_size = bytes;
        self
    }

    /// Enables or disables unsequence compaction.
    #[must_use]
    pub const fn enable_unseq_compaction(mut self, value: bool) -> Self {
        self.enable_unseq_compaction = value;
        self
    }

    /// Sets the merge selector.
    #[must_use]
    pub const fn selector(mut self, kind: SelectorKind) -> Self {
        self.selector = kind;
        self
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_level_num == 0 {
            return Err(CoreError::invalid_config("max_level_num must be at least 1"));
        }
        if self.target_file_size == 0 {
            return Err(CoreError::invalid_config("target_file_size must be positive"));
        }
        Ok(())
    }

    /// Index of the highest level.
    #[must_use]
    pub const fn last_level(&self) -> usize {
        self.max_level_num.saturating_sub(1)
    }
}
