//! CLI parse: clap types for strata. No behavior; definitions only.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// strata CLI - partitioned file-metadata cache
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Query and maintain partitioned file-metadata caches")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (where config/ is looked up)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild caches from their sources (all configured caches by default)
    Update {
        /// Cache names
        names: Vec<String>,
    },
    /// List configured caches and when they were last built
    List,
    /// Print cached records matching the filters, in path order
    Find {
        /// Cache name
        name: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Show owner, size, date and permissions as well as the path
        #[arg(long, short)]
        long: bool,
    },
    /// Summarize cached records matching the filters
    Info {
        /// Cache name
        name: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Breakdown to show
        #[arg(long, value_enum, default_value = "total")]
        by: InfoView,
    },
    /// Delete matching files from disk and record the deletions in the cache
    Delete {
        /// Cache name
        name: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Report what would be deleted without touching anything
        #[arg(long)]
        dry_run: bool,
    },
}

/// Filter flags shared by the query commands
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Owner (numeric uid as recorded)
    #[arg(long)]
    pub user: Option<String>,

    /// Dataset
    #[arg(long)]
    pub dataset: Option<String>,

    /// Minimum size, e.g. 10M
    #[arg(long, value_name = "SIZE")]
    pub size_geq: Option<String>,

    /// Only files last modified more than DAYS ago
    #[arg(long, value_name = "DAYS")]
    pub older_than: Option<u32>,

    /// Only files modified within the last DAYS
    #[arg(long, value_name = "DAYS")]
    pub newer_than: Option<u32>,

    /// Exclude paths matching a glob (repeatable)
    #[arg(long = "not-path", value_name = "GLOB")]
    pub not_path: Vec<String>,

    /// Only paths matching a regular expression (repeatable)
    #[arg(long, value_name = "RE")]
    pub regex: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoView {
    Total,
    Users,
    Datasets,
    Sizes,
}
