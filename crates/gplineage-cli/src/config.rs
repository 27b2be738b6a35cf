//! Configuration file handling

use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::args::{AnalyzeArgs, OutputFormat};

pub const CONFIG_FILE_NAME: &str = "gplineage.toml";
pub const DEFAULT_OUTPUT_DIR: &str = "lineage_results";

/// Configuration for gplineage
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Schema JSON file; schema discovery runs when absent
    pub schema: Option<String>,

    /// Directory where result files are saved
    pub output_dir: Option<String>,

    /// SQL dialect ("greenplum" or "postgresql")
    pub dialect: Option<String>,

    pub default_catalog: Option<String>,

    pub default_schema: Option<String>,

    /// Maximum lineage recursion depth per column
    pub max_depth: Option<usize>,

    /// Summary format (human, json)
    pub format: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .into_diagnostic()
            .wrap_err_with(|| format!("Invalid config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Try to find and load gplineage.toml in current directory or parent directories
    pub fn find_and_load() -> Result<Option<Self>> {
        let current_dir = std::env::current_dir().into_diagnostic()?;
        Self::find_from(current_dir)
    }

    /// Search `start` and its ancestors for the config file
    pub fn find_from(start: PathBuf) -> Result<Option<Self>> {
        let mut current_dir = start;

        loop {
            let config_path = current_dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Ok(Some(Self::from_file(&config_path)?));
            }

            // Try parent directory
            if !current_dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Merge CLI arguments into configuration
    /// CLI arguments take precedence over config file values
    pub fn merge_with_args(mut self, args: &AnalyzeArgs) -> Self {
        if let Some(schema) = &args.schema {
            self.schema = Some(schema.display().to_string());
        }
        if let Some(output_dir) = &args.output_dir {
            self.output_dir = Some(output_dir.display().to_string());
        }
        if args.dialect.is_some() {
            self.dialect = args.dialect.clone();
        }
        if args.default_catalog.is_some() {
            self.default_catalog = args.default_catalog.clone();
        }
        if args.default_schema.is_some() {
            self.default_schema = args.default_schema.clone();
        }
        if args.max_depth.is_some() {
            self.max_depth = args.max_depth;
        }
        if let Some(fmt) = args.format {
            self.format = Some(format!("{:?}", fmt).to_lowercase());
        }

        self
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.output_dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR))
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        match self.format.as_deref() {
            None | Some("human") => Ok(OutputFormat::Human),
            Some("json") => Ok(OutputFormat::Json),
            Some(other) => {
                miette::bail!("Unknown output format '{}'. Use 'human' or 'json'.", other)
            }
        }
    }
}
