//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "gplineage")]
#[command(
    author,
    version,
    about = "Generate table and column lineage from Greenplum SQL scripts"
)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Logging verbosity
    #[arg(long, global = true, value_enum, env = "GPLINEAGE_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Analyze every .sql file of a directory and write a lineage report
    Analyze(AnalyzeArgs),

    /// List the source tables referenced by SQL files
    Tables {
        /// SQL files to scan (supports glob patterns)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// SQL dialect
        #[arg(short, long, default_value = "greenplum")]
        dialect: String,
    },

    /// Display the contents of a schema JSON file
    Schema {
        /// Schema JSON file
        file: PathBuf,
    },

    /// Parse SQL and display statements (for debugging)
    Parse {
        /// SQL file to parse
        file: PathBuf,

        /// SQL dialect
        #[arg(short, long, default_value = "greenplum")]
        dialect: String,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct AnalyzeArgs {
    /// Directory containing the .sql files to analyze
    #[arg(value_name = "SQL_DIR")]
    pub sql_directory: PathBuf,

    /// Pre-existing schema JSON file; skips schema discovery
    #[arg(short, long, value_name = "FILE")]
    pub schema: Option<PathBuf>,

    /// Directory where result files are saved [default: lineage_results]
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// SQL dialect [default: greenplum]
    #[arg(short, long)]
    pub dialect: Option<String>,

    /// Catalog used for unqualified tables instead of the schema's first one
    #[arg(long, value_name = "NAME")]
    pub default_catalog: Option<String>,

    /// Schema used when a script has no SET search_path
    #[arg(long, value_name = "NAME")]
    pub default_schema: Option<String>,

    /// Maximum lineage recursion depth per column
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Summary format
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Configuration file (defaults to gplineage.toml in this or a parent directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable per-table summary
    #[default]
    Human,
    /// Full lineage report as JSON
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
