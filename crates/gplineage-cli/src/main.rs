//! gplineage CLI - table and column lineage for Greenplum SQL scripts

mod args;
mod config;
mod output;
mod schema_source;
mod workflow;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Instant;

use clap::Parser;
use gplineage_core::dialect::generate;
use gplineage_core::{Analyzer, AnalyzerOptions, Catalog, DialectRegistry, ScriptParser};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::args::{AnalyzeArgs, Args, Command, OutputFormat};
use crate::config::Config;
use crate::output::OutputFormatter;

const LOG_FILE_NAME: &str = "lineage_analysis.log";

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(has_errors) => {
            if has_errors {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(2)
        }
    }
}

/// Install the subscriber; the log file mirrors the console without colors
fn init_tracing(args: &Args, log_file: Option<&Path>) -> Result<()> {
    let level = match (args.log_level, args.quiet, args.verbose) {
        (Some(level), _, _) => level.level(),
        (None, true, _) => tracing::Level::ERROR,
        (None, false, 0) => tracing::Level::INFO,
        (None, false, 1) => tracing::Level::DEBUG,
        (None, false, _) => tracing::Level::TRACE,
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = fs::File::create(path).into_diagnostic()?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn run(args: Args) -> Result<bool> {
    match &args.command {
        Command::Analyze(analyze) => run_analyze(&args, analyze),

        Command::Tables { files, dialect } => {
            init_tracing(&args, None)?;
            let dialect = DialectRegistry::default().resolve(dialect)?;
            let options = AnalyzerOptions {
                dialect,
                ..AnalyzerOptions::default()
            };
            let catalog = Catalog::default();
            let analyzer = Analyzer::with_options(&catalog, options);

            let mut tables = BTreeSet::new();
            for file in expand_patterns(files)? {
                let content = fs::read_to_string(&file).into_diagnostic()?;
                tables.extend(analyzer.discover_source_tables(&content));
            }
            for table in &tables {
                println!("{}", table);
            }
            Ok(false)
        }

        Command::Schema { file } => {
            init_tracing(&args, None)?;
            let catalog = schema_source::load_schema_file(file)?;
            OutputFormatter::new(OutputFormat::Human)
                .print_catalog(&catalog)
                .into_diagnostic()?;
            Ok(false)
        }

        Command::Parse { file, dialect } => {
            // Parse and display statements (for debugging)
            init_tracing(&args, None)?;
            let dialect = DialectRegistry::default().resolve(dialect)?;
            let content = fs::read_to_string(file).into_diagnostic()?;

            match ScriptParser::new(dialect).parse(&content) {
                Ok(statements) => {
                    for (i, stmt) in statements.iter().enumerate() {
                        println!("Statement {}:", i + 1);
                        println!("{:#?}", stmt.statement);
                        if let Some(distribution) = &stmt.distribution {
                            println!("Distribution: {}", distribution);
                        }
                        println!();
                    }
                    println!("Regenerated SQL:");
                    println!("{}", generate(&statements));
                }
                Err(e) => {
                    eprintln!("Parse error: {}", e);
                    return Ok(true);
                }
            }

            Ok(false)
        }
    }
}

fn run_analyze(args: &Args, analyze: &AnalyzeArgs) -> Result<bool> {
    let config = match &analyze.config {
        Some(path) => Config::from_file(path)?,
        None => Config::find_and_load()?.unwrap_or_default(),
    };
    let config = config.merge_with_args(analyze);

    let output_dir = config.output_dir();
    fs::create_dir_all(&output_dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not create output directory '{}'", output_dir.display()))?;
    init_tracing(args, Some(&output_dir.join(LOG_FILE_NAME)))?;

    let start = Instant::now();
    info!("Starting lineage analysis process...");

    let dialect = match &config.dialect {
        Some(name) => DialectRegistry::default().resolve(name)?,
        None => Default::default(),
    };
    let options = AnalyzerOptions {
        dialect,
        default_catalog: config.default_catalog.clone(),
        default_schema: config.default_schema.clone(),
        max_depth: config.max_depth.unwrap_or(AnalyzerOptions::default().max_depth),
    };
    let format = config.output_format()?;
    let schema_file = config.schema.as_ref().map(PathBuf::from);

    let Some(run) =
        workflow::analyze_directory(&analyze.sql_directory, schema_file.as_deref(), options)?
    else {
        info!("Analysis concluded with no results.");
        return Ok(false);
    };

    workflow::write_outputs(&run, &output_dir)?;
    OutputFormatter::new(format)
        .print_report(&run.report)
        .into_diagnostic()?;

    info!(
        "Analysis of {} file(s) complete. Total time: {:.2} seconds.",
        run.files.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(run.report.has_errors())
}

/// Expand glob patterns; plain paths are kept as given
fn expand_patterns(patterns: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let pattern_str = pattern.display().to_string();
        if pattern_str.contains('*') {
            for path in glob::glob(&pattern_str).into_diagnostic()?.flatten() {
                files.push(path);
            }
        } else {
            files.push(pattern.clone());
        }
    }
    Ok(files)
}
