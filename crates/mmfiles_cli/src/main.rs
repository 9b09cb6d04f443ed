//! mmfiles CLI
//!
//! Offline tools for datafiles and WAL directories.
//!
//! # Commands
//!
//! - `judge` - Classify a file as ok, empty or unreadable
//! - `scan` - List every marker of a datafile
//! - `check` - Open a datafile and verify its markers
//! - `repair` - Blank or truncate corrupt markers in place
//! - `truncate` - Cut a datafile at a position and seal it
//! - `wal` - Inspect a WAL directory and dry-run its recovery

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// mmfiles datafile and WAL tools.
#[derive(Parser)]
#[command(name = "mmfiles")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a file as ok, empty or unreadable
    Judge {
        /// Datafile or logfile
        file: PathBuf,
    },

    /// List every marker of a datafile
    Scan {
        /// Datafile or logfile
        file: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Open a datafile and verify its markers
    Check {
        /// Datafile or logfile
        file: PathBuf,

        /// Accept a corrupt tail instead of failing
        #[arg(long)]
        ignore_failures: bool,
    },

    /// Blank or truncate corrupt markers in place
    Repair {
        /// Datafile or logfile
        file: PathBuf,
    },

    /// Cut a datafile at a position and seal it
    Truncate {
        /// Datafile or logfile
        file: PathBuf,

        /// Offset of the first byte to drop
        #[arg(short, long)]
        position: u32,
    },

    /// Inspect a WAL directory and dry-run its recovery
    Wal {
        /// WAL directory
        dir: PathBuf,

        /// Id of the last logfile known to be collected
        #[arg(long, default_value = "0")]
        last_collected: u64,

        /// Truncate corrupt logfiles instead of failing
        #[arg(long)]
        ignore_logfile_errors: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Judge { file } => commands::judge::run(&file)?,
        Commands::Scan { file, json } => commands::scan::run(&file, json)?,
        Commands::Check {
            file,
            ignore_failures,
        } => commands::check::run(&file, ignore_failures)?,
        Commands::Repair { file } => commands::repair::run(&file)?,
        Commands::Truncate { file, position } => commands::repair::truncate(&file, position)?,
        Commands::Wal {
            dir,
            last_collected,
            ignore_logfile_errors,
        } => commands::wal::run(&dir, last_collected, ignore_logfile_errors)?,
    }

    Ok(())
}
