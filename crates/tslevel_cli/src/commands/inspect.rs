//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use tslevel_core::{
    CompactionConfig, CompactionLogAnalyzer, CoreResult, LevelRegistry, StorageGroupDir,
};

/// Storage group inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage group directory.
    pub path: String,
    /// Storage group name.
    pub name: String,
    /// Number of live sequence files.
    pub sequence_files: usize,
    /// Number of live unsequence files.
    pub unsequence_files: usize,
    /// Total size of live data files in bytes.
    pub total_size: u64,
    /// Per-partition level counts, ascending by partition.
    pub partitions: Vec<PartitionLevels>,
    /// State of a pending compaction log, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_log: Option<PendingLog>,
    /// Every data file (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileInfo>>,
}

/// File counts per level for one partition.
#[derive(Debug, Serialize)]
pub struct PartitionLevels {
    /// Partition ID.
    pub partition: i64,
    /// Sequence file count per level, level 0 first.
    pub sequence: Vec<usize>,
    /// Unsequence file count per level, level 0 first.
    pub unsequence: Vec<usize>,
}

/// What a leftover compaction log records.
#[derive(Debug, Serialize)]
pub struct PendingLog {
    /// Number of logged sources.
    pub sources: usize,
    /// Logged target.
    pub target: Option<String>,
    /// Whether the swap had committed.
    pub merge_finished: bool,
    /// Read error, if the log is unusable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One live data file.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File path.
    pub path: String,
    /// Whether it is a sequence file.
    pub sequence: bool,
    /// Partition ID.
    pub partition: i64,
    /// Level the file sits at.
    pub level: usize,
    /// First timestamp.
    pub start: i64,
    /// Last timestamp.
    pub end: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    name: &str,
    show_files: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = StorageGroupDir::open(path, name, false)?;
    let result = collect(&dir, show_files)?;

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers level and log information for `dir`.
pub fn collect(dir: &StorageGroupDir, show_files: bool) -> CoreResult<InspectResult> {
    let config = CompactionConfig::default();
    let registry = LevelRegistry::new(&config);
    let scanned = dir.scan()?;
    let total_size = scanned
        .sequence
        .iter()
        .chain(&scanned.unsequence)
        .map(|f| f.size())
        .sum();
    registry.add_all(scanned.sequence, true);
    registry.add_all(scanned.unsequence, false);

    let mut partition_ids = registry.partitions(true);
    partition_ids.extend(registry.partitions(false));
    partition_ids.sort();
    partition_ids.dedup();
    let partitions = partition_ids
        .into_iter()
        .map(|partition| PartitionLevels {
            partition: partition.as_i64(),
            sequence: registry.level_sizes(true, partition),
            unsequence: registry.level_sizes(false, partition),
        })
        .collect();

    let log_path = dir.compaction_log_path();
    let pending_log = log_path.exists().then(|| match CompactionLogAnalyzer::analyze(&log_path) {
        Ok(summary) => PendingLog {
            sources: summary.sources.len(),
            target: summary.target.map(|t| t.display().to_string()),
            merge_finished: summary.merge_finished,
            error: None,
        },
        Err(err) => PendingLog {
            sources: 0,
            target: None,
            merge_finished: false,
            error: Some(err.to_string()),
        },
    });

    let files = show_files.then(|| {
        [true, false]
            .into_iter()
            .flat_map(|is_sequence| {
                registry
                    .list(is_sequence)
                    .into_iter()
                    .map(move |file| (is_sequence, file))
            })
            .map(|(is_sequence, file)| FileInfo {
                path: file.path().display().to_string(),
                sequence: is_sequence,
                partition: file.partition().as_i64(),
                level: file.level(config.max_level_num),
                start: file.time_range().start,
                end: file.time_range().end,
                size: file.size(),
            })
            .collect()
    });

    Ok(InspectResult {
        path: dir.root().display().to_string(),
        name: dir.name().to_string(),
        sequence_files: registry.size(true),
        unsequence_files: registry.size(false),
        total_size,
        partitions,
        pending_log,
        files,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Storage group: {} ({})", result.name, result.path);
    println!();
    println!("Data files:");
    println!("  Sequence:   {}", result.sequence_files);
    println!("  Unsequence: {}", result.unsequence_files);
    println!("  Total size: {} bytes", result.total_size);
    println!();

    if result.partitions.is_empty() {
        println!("No partitions");
    } else {
        println!("Levels (level 0 first):");
        for p in &result.partitions {
            println!(
                "  partition {:>6}  seq {:?}  unseq {:?}",
                p.partition, p.sequence, p.unsequence
            );
        }
    }

    if let Some(log) = &result.pending_log {
        println!();
        match &log.error {
            Some(err) => println!("Pending compaction log is unreadable: {err}"),
            None => {
                println!("Pending compaction log:");
                println!("  Sources:        {}", log.sources);
                println!(
                    "  Target:         {}",
                    log.target.as_deref().unwrap_or("(none)")
                );
                println!("  Merge finished: {}", log.merge_finished);
                println!("  Run `tslevel recover` to repair");
            }
        }
    }

    if let Some(files) = &result.files {
        println!();
        println!("Files:");
        for f in files {
            println!(
                "  {} [{}] L{} {}..={} {} bytes",
                f.path,
                if f.sequence { "seq" } else { "unseq" },
                f.level,
                f.start,
                f.end,
                f.size
            );
        }
    }
}
