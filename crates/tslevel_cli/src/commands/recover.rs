//! Recover command implementation.

use std::path::Path;
use std::sync::Arc;
use tslevel_core::{FileModificationStore, RecoveryController, StorageGroupDir};

/// Runs the recover command.
pub fn run(path: &Path, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dir = StorageGroupDir::open(path, name, false)?;
    let controller =
        RecoveryController::new(dir.compaction_log_path(), Arc::new(FileModificationStore));

    println!("Recovering storage group {name} at {}", path.display());
    let report = controller.recover()?;

    if !report.log_found {
        println!("No compaction log found, nothing to do");
        return Ok(());
    }
    if report.log_corrupted {
        println!("Compaction log was corrupted and has been discarded");
    }
    if report.merge_kept {
        println!("Interrupted merge was kept");
        for source in &report.deleted_sources {
            println!("  deleted source {}", source.display());
        }
    } else {
        println!("Interrupted merge was rolled back");
        for target in &report.removed_targets {
            println!("  removed target {}", target.display());
        }
    }
    println!("✓ Recovery complete");
    Ok(())
}
