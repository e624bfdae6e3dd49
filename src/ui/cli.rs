//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vigil: multi-threaded file scanning engine with quarantine
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control server
    Serve {
        /// Address to listen on (overrides server.bind_address)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Scan a directory and print events as JSON lines
    Scan {
        /// Root directory to scan
        path: PathBuf,

        /// CPU budget in percent (10-100)
        #[arg(long, default_value = "100", value_parser = clap::value_parser!(u8).range(1..=100))]
        cpu_limit: u8,

        /// Only scan the top-level directory
        #[arg(long)]
        no_recursive: bool,
    },

    /// Manage quarantined files
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },

    /// Show recent scan history
    History {
        /// Number of recent scans to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Inspect the signature set
    Signatures {
        #[command(subcommand)]
        action: SignatureAction,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show application information
    Info,
}

/// Quarantine subcommands.
#[derive(Subcommand, Debug)]
pub enum QuarantineAction {
    /// List quarantined files
    List,

    /// Move a file into quarantine
    Add {
        /// File to quarantine
        path: PathBuf,
    },

    /// Restore a quarantined file to its original location
    Restore {
        /// Quarantine file name
        filename: String,
    },

    /// Restore every quarantined file
    RestoreAll,

    /// Delete a quarantined file permanently
    Delete {
        /// Quarantine file name
        filename: String,
    },
}

/// Signature subcommands.
#[derive(Subcommand, Debug)]
pub enum SignatureAction {
    /// List loaded signatures and rejected lines
    List,

    /// Classify a single file
    Check {
        /// File to classify
        file: PathBuf,
    },
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file location
    Path,

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
