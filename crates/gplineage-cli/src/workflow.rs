//! End-to-end analysis of a directory of SQL scripts

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use gplineage_core::{Analyzer, AnalyzerOptions, Catalog, LineageReport};
use miette::{IntoDiagnostic, Result, WrapErr};
use tracing::{debug, error, info, warn};

use crate::schema_source::{fetch_schema, load_schema_file};

pub const REPORT_FILE_NAME: &str = "lineage_report.json";
pub const SCHEMA_FILE_NAME: &str = "generated_schema.json";

/// Results of one `analyze` run
#[derive(Debug)]
pub struct AnalysisRun {
    pub report: LineageReport,
    /// Catalog built by schema discovery; `None` when a schema file was given
    pub generated_schema: Option<Catalog>,
    pub files: Vec<PathBuf>,
}

/// Recursively find all `.sql` files below a directory, sorted by path
pub fn find_sql_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/**/*.sql",
        glob::Pattern::escape(&directory.display().to_string())
    );
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .into_diagnostic()?
        .flatten()
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Analyze every script below `directory`
///
/// Returns `Ok(None)` when there is nothing to analyze.
pub fn analyze_directory(
    directory: &Path,
    schema_file: Option<&Path>,
    options: AnalyzerOptions,
) -> Result<Option<AnalysisRun>> {
    info!(directory = %directory.display(), "Starting analysis");
    if !directory.is_dir() {
        miette::bail!("Directory not found: '{}'", directory.display());
    }

    let find_start = Instant::now();
    let files = find_sql_files(directory)?;
    if files.is_empty() {
        warn!("No .sql files found.");
        return Ok(None);
    }
    info!(
        "Found {} SQL file(s) in {:.2} seconds.",
        files.len(),
        find_start.elapsed().as_secs_f64()
    );

    let scripts = read_scripts(&files);

    let (catalog, generated_schema) = match schema_file {
        Some(path) => {
            info!(path = %path.display(), "Loading schema from file; skipping database discovery");
            (load_schema_file(path)?, None)
        }
        None => {
            info!("No schema file provided. Proceeding with database discovery.");
            let catalog = discover_schema(&scripts, &options);
            (catalog.clone(), Some(catalog))
        }
    };

    let lineage_start = Instant::now();
    let analyzer = Analyzer::with_options(&catalog, options);
    let mut report = LineageReport::new();
    for (path, script) in &scripts {
        debug!(file = %path.display(), "Analyzing file");
        report.merge_file(&file_name(path), analyzer.analyze(script));
    }
    info!(
        "Lineage generation for all files completed in {:.2} seconds.",
        lineage_start.elapsed().as_secs_f64()
    );

    Ok(Some(AnalysisRun {
        report,
        generated_schema,
        files,
    }))
}

/// Write the report (and the discovered schema, if any) into `output_dir`
pub fn write_outputs(run: &AnalysisRun, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .into_diagnostic()
        .wrap_err_with(|| {
            format!("Could not create output directory '{}'", output_dir.display())
        })?;
    info!(directory = %output_dir.display(), "Saving results");

    if let Some(schema) = &run.generated_schema {
        let schema_path = output_dir.join(SCHEMA_FILE_NAME);
        let json = serde_json::to_string_pretty(schema).into_diagnostic()?;
        fs::write(&schema_path, json).into_diagnostic()?;
        info!("Schema saved to '{}'", schema_path.display());
    }

    let report_path = output_dir.join(REPORT_FILE_NAME);
    let json = run.report.to_json_pretty().into_diagnostic()?;
    fs::write(&report_path, json)
        .into_diagnostic()
        .wrap_err("Failed to write output files")?;
    info!("Lineage report saved to '{}'", report_path.display());
    Ok(())
}

/// Read every file, skipping unreadable ones
fn read_scripts(files: &[PathBuf]) -> Vec<(PathBuf, String)> {
    files
        .iter()
        .filter_map(|path| match fs::read_to_string(path) {
            Ok(content) => Some((path.clone(), content)),
            Err(e) => {
                error!(file = %path.display(), error = %e, "Failed to read file");
                None
            }
        })
        .collect()
}

fn discover_schema(scripts: &[(PathBuf, String)], options: &AnalyzerOptions) -> Catalog {
    let extract_start = Instant::now();
    let empty = Catalog::default();
    let analyzer = Analyzer::with_options(&empty, options.clone());

    let tables: BTreeSet<String> = scripts
        .iter()
        .flat_map(|(_, script)| analyzer.discover_source_tables(script))
        .collect();
    info!(
        "Extracted {} unique table names in {:.2} seconds.",
        tables.len(),
        extract_start.elapsed().as_secs_f64()
    );
    debug!(tables = ?tables, "Unique table names found");

    let catalog = fetch_schema(&tables);
    if catalog.is_empty() {
        warn!("Schema could not be built. Lineage analysis may be incomplete or fail.");
    }
    catalog
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_find_sql_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.sql", "SELECT 1;");
        write(dir.path(), "nested/a.sql", "SELECT 1;");
        write(dir.path(), "notes.txt", "not sql");

        let files = find_sql_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["b.sql", "a.sql"]);
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyze_directory(&dir.path().join("nope"), None, AnalyzerOptions::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("Directory not found"));
    }

    #[test]
    fn test_empty_directory_has_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let run = analyze_directory(dir.path(), None, AnalyzerOptions::default()).unwrap();
        assert!(run.is_none());
    }

    #[test]
    fn test_discovery_uses_simulated_schema() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "user_orders.sql",
            "SET search_path TO raw_data;
             CREATE TABLE user_totals AS
             SELECT u.id, u.name, sum(o.amount) AS total
             FROM users u JOIN orders o ON o.user_id = u.id
             GROUP BY u.id, u.name
             DISTRIBUTED BY (id);",
        );

        let run = analyze_directory(dir.path(), None, AnalyzerOptions::default())
            .unwrap()
            .unwrap();
        assert!(run.generated_schema.is_some());

        let table = &run.report.lineage["my_gp_db.raw_data.user_totals"];
        assert_eq!(
            table.depends_on,
            vec!["my_gp_db.raw_data.orders", "my_gp_db.raw_data.users"]
        );
        assert_eq!(
            table.columns["total"].lineage,
            vec!["my_gp_db.raw_data.orders.amount"]
        );
    }

    #[test]
    fn test_errors_are_prefixed_with_file_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.sql", "CREATE TABLE t AS SELEC 1;");
        let schema = dir.path().join("schema.json");
        fs::write(&schema, r#"{"db": {"s": {"base": {"a": "INT"}}}}"#).unwrap();

        let run = analyze_directory(dir.path(), Some(&schema), AnalyzerOptions::default())
            .unwrap()
            .unwrap();
        assert!(run.generated_schema.is_none());
        assert!(run.report.errors["script"][0].starts_with("[broken.sql] Failed to parse"));
    }

    #[test]
    fn test_write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "sql/t.sql",
            "SET search_path TO analytics; CREATE TABLE t AS SELECT user_id FROM user_orders;",
        );
        let run = analyze_directory(&dir.path().join("sql"), None, AnalyzerOptions::default())
            .unwrap()
            .unwrap();

        let out = dir.path().join("results");
        write_outputs(&run, &out).unwrap();

        let report: LineageReport =
            serde_json::from_str(&fs::read_to_string(out.join(REPORT_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(
            report.lineage["my_gp_db.analytics.t"].columns["user_id"].lineage,
            vec!["my_gp_db.analytics.user_orders.user_id"]
        );

        let schema_json = fs::read_to_string(out.join(SCHEMA_FILE_NAME)).unwrap();
        let schema = Catalog::from_json_str(&schema_json).unwrap();
        assert_eq!(schema.first_catalog(), Some("my_gp_db"));
    }
}
