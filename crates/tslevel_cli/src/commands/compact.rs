//! Compact command implementation.

use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tslevel_core::{
    Collaborators, CompactionConfig, CompactionManager, CycleOutcome, PartitionId, StatsSnapshot,
    StorageGroupDir,
};
use tracing::{debug, info};
use tslevel_storage::{MetadataCache, ReaderPool};

/// Result of one compact run.
#[derive(Debug, Serialize)]
pub struct CompactResult {
    /// One entry per cycle run.
    pub cycles: Vec<CycleReport>,
    /// Counters after the run.
    pub stats: StatsSnapshot,
}

/// Outcome of one cycle.
#[derive(Debug, Serialize)]
pub struct CycleReport {
    /// Partition ID.
    pub partition: i64,
    /// Outcome kind.
    pub outcome: &'static str,
    /// Produced files, for a merged cycle.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    /// Failure reason, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CycleReport {
    fn new(partition: PartitionId, outcome: CycleOutcome) -> Self {
        let (kind, targets, reason) = match outcome {
            CycleOutcome::Merged { targets, .. } => (
                "merged",
                targets.iter().map(|t| t.display().to_string()).collect(),
                None,
            ),
            CycleOutcome::NoCandidate => ("no-candidate", Vec::new(), None),
            CycleOutcome::NotExecuted { reason } => ("not-executed", Vec::new(), Some(reason)),
            CycleOutcome::Failed { reason, restored } => (
                "failed",
                Vec::new(),
                Some(if restored {
                    reason
                } else {
                    format!("{reason} (restore failed)")
                }),
            ),
            CycleOutcome::AlreadyRunning => ("already-running", Vec::new(), None),
        };
        Self {
            partition: partition.as_i64(),
            outcome: kind,
            targets,
            reason,
        }
    }
}

/// Loads compaction settings from a JSON file, or the defaults.
pub fn load_config(path: Option<&Path>) -> Result<CompactionConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(CompactionConfig::default());
    };
    let config: CompactionConfig = serde_json::from_str(&fs::read_to_string(path)?)?;
    config.validate()?;
    Ok(config)
}

/// Runs the compact command.
pub fn run(
    path: &Path,
    name: &str,
    config: Option<&Path>,
    partition: Option<i64>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    debug!(storage_group = name, ?config, "loaded compaction config");
    let dir = StorageGroupDir::open(path, name, false)?;
    let collaborators =
        Collaborators::local(Arc::new(ReaderPool::new()), Arc::new(MetadataCache::new()));
    let manager = CompactionManager::open(&dir, config, collaborators)?;

    let outcomes = match partition {
        Some(id) => {
            let partition = PartitionId::new(id);
            vec![(partition, manager.run_cycle(partition))]
        }
        None => manager.run_all(),
    };
    info!(
        storage_group = name,
        cycles = outcomes.len(),
        merged = outcomes.iter().filter(|(_, o)| o.is_merged()).count(),
        "compaction run finished"
    );
    let result = CompactResult {
        cycles: outcomes
            .into_iter()
            .map(|(partition, outcome)| CycleReport::new(partition, outcome))
            .collect(),
        stats: manager.stats().snapshot(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &CompactResult) {
    if result.cycles.is_empty() {
        println!("No partition has unsequence files to compact");
        return;
    }
    println!("Compaction:");
    for cycle in &result.cycles {
        match &cycle.reason {
            Some(reason) => println!("  partition {:>6}  {}: {reason}", cycle.partition, cycle.outcome),
            None => println!("  partition {:>6}  {}", cycle.partition, cycle.outcome),
        }
        for target in &cycle.targets {
            println!("    -> {target}");
        }
    }
    println!();
    println!("  Files merged:       {}", result.stats.files_merged);
    println!("  Files produced:     {}", result.stats.files_produced);
    println!("  Bytes merged:       {}", result.stats.bytes_merged);
    println!("  Tombstones carried: {}", result.stats.tombstones_carried);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn config_defaults_without_file() {
        assert_eq!(load_config(None).unwrap(), CompactionConfig::default());
    }

    #[test]
    fn config_from_json_fills_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cfg.json");
        fs::write(&path, r#"{"max_level_num": 2, "selector": "overlap"}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.max_level_num, 2);
        assert_eq!(config.selector, tslevel_core::SelectorKind::Overlap);
        assert_eq!(config.target_file_size, CompactionConfig::default().target_file_size);
    }

    #[test]
    fn invalid_config_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cfg.json");
        fs::write(&path, r#"{"max_level_num": 0}"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn failed_cycle_report_mentions_restore() {
        let report = CycleReport::new(
            PartitionId::new(5),
            CycleOutcome::Failed {
                reason: "boom".into(),
                restored: false,
            },
        );
        assert_eq!(report.outcome, "failed");
        assert_eq!(report.reason.as_deref(), Some("boom (restore failed)"));
    }
}
