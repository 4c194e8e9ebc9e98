//! tslevel CLI
//!
//! Maintenance tools for tslevel storage groups.
//!
//! # Commands
//!
//! - `inspect` - Show levels, partitions and any pending compaction log
//! - `recover` - Repair the state left by an interrupted merge
//! - `compact` - Run compaction cycles
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tslevel storage group tools.
#[derive(Parser)]
#[command(name = "tslevel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage group directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Storage group name (defaults to the directory name)
    #[arg(global = true, short, long)]
    name: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show levels, partitions and any pending compaction log
    Inspect {
        /// List every data file
        #[arg(short, long)]
        files: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Repair the state left by an interrupted merge
    Recover,

    /// Run compaction cycles
    Compact {
        /// JSON file with compaction settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only compact this partition
        #[arg(long)]
        partition: Option<i64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { files, format } => {
            let path = cli.path.ok_or("Storage group path required for inspect")?;
            let name = commands::group_name(&path, cli.name)?;
            commands::inspect::run(&path, &name, files, &format)?;
        }
        Commands::Recover => {
            let path = cli.path.ok_or("Storage group path required for recover")?;
            let name = commands::group_name(&path, cli.name)?;
            commands::recover::run(&path, &name)?;
        }
        Commands::Compact {
            config,
            partition,
            format,
        } => {
            let path = cli.path.ok_or("Storage group path required for compact")?;
            let name = commands::group_name(&path, cli.name)?;
            commands::compact::run(&path, &name, config.as_deref(), partition, &format)?;
        }
        Commands::Version => {
            println!("tslevel CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "tsfile format v{}, compaction log magic {}",
                tslevel_storage::TSFILE_VERSION,
                String::from_utf8_lossy(&tslevel_core::LOG_MAGIC)
            );
        }
    }

    Ok(())
}
