//! ReplayKit CLI
//!
//! Command-line tools for WPILOG files.
//!
//! # Commands
//!
//! - `inspect` - Display the header, entries and record counts of a log
//! - `dump` - Print decoded data records

mod commands;

use clap::{Parser, Subcommand};
use commands::dump::DumpFilter;
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ReplayKit command-line log tools.
#[derive(Parser)]
#[command(name = "replaykit")]
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
    /// Display log header, entries and record counts
    Inspect {
        /// Log file to inspect
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print decoded data records
    Dump {
        /// Log file to dump
        file: PathBuf,

        /// Only dump this entry
        #[arg(short, long)]
        entry: Option<String>,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { file, format } => {
            commands::inspect::run(&file, format)?;
        }
        Commands::Dump {
            file,
            entry,
            limit,
            format,
        } => {
            commands::dump::run(&file, &DumpFilter { entry, limit }, format)?;
        }
        Commands::Version => {
            println!("ReplayKit CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ReplayKit Core v{}", replaykit_core::VERSION);
        }
    }

    Ok(())
}
