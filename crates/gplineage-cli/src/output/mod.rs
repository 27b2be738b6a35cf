//! Output formatting

use std::fmt::Write;

use gplineage_core::{Catalog, LineageReport};

use crate::args::OutputFormat;

/// Output formatter for analysis results
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the per-table summary of a report in the configured format
    pub fn print_report(&self, report: &LineageReport) -> serde_json::Result<()> {
        match self.format {
            OutputFormat::Human => print!("{}", render_summary(report)),
            OutputFormat::Json => println!("{}", report.to_json_pretty()?),
        }
        Ok(())
    }

    pub fn print_catalog(&self, catalog: &Catalog) -> serde_json::Result<()> {
        match self.format {
            OutputFormat::Human => print!("{}", render_catalog(catalog)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(catalog)?),
        }
        Ok(())
    }
}

/// Successful vs. errored tables
pub fn render_summary(report: &LineageReport) -> String {
    let successful = report.successful_tables();
    let errored = report.errored_tables();
    let mut out = String::new();

    let _ = writeln!(out, "-------------------- Analysis Summary --------------------");
    if successful.is_empty() && errored.is_empty() {
        let _ = writeln!(out, "No tables were processed for lineage.");
    }
    if !successful.is_empty() {
        let _ = writeln!(
            out,
            "\x1b[32m✓\x1b[0m {} table(s) traced successfully:",
            successful.len()
        );
        for table in &successful {
            let _ = writeln!(out, "  - {}", table);
        }
    }
    if !errored.is_empty() {
        let _ = writeln!(
            out,
            "\x1b[31m✗\x1b[0m {} table(s) encountered errors:",
            errored.len()
        );
        for table in &errored {
            let _ = writeln!(out, "  - {}", table);
            for message in &report.errors[*table] {
                let _ = writeln!(out, "      {}", message);
            }
        }
        let _ = writeln!(
            out,
            "Check the 'errors' section in lineage_report.json for details."
        );
    }
    let _ = writeln!(out, "----------------------------------------------------------");
    out
}

pub fn render_catalog(catalog: &Catalog) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Schema Information:");
    let _ = writeln!(out, "==================");
    for (catalog_name, database) in catalog.catalogs() {
        let _ = writeln!(out, "\nCatalog: {}", catalog_name);
        for (schema_name, schema) in &database.schemas {
            let _ = writeln!(out, "  Schema: {}", schema_name);
            for (table_name, table) in &schema.tables {
                let _ = writeln!(out, "    Table: {}", table_name);
                for (column, data_type) in &table.columns {
                    let _ = writeln!(out, "      - {} {}", column, data_type);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gplineage_core::{CatalogBuilder, TableLineage};

    #[test]
    fn test_summary_lists_tables() {
        let mut report = LineageReport::new();
        report.lineage.insert("db.s.ok".to_string(), TableLineage::default());
        report.add_error("db.s.bad", "[x.sql] Could not analyze statement: boom");

        let summary = render_summary(&report);
        assert!(summary.contains("1 table(s) traced successfully:\n  - db.s.ok\n"));
        assert!(summary.contains("1 table(s) encountered errors:\n  - db.s.bad\n"));
        assert!(summary.contains("[x.sql] Could not analyze statement: boom"));
    }

    #[test]
    fn test_summary_without_tables() {
        let summary = render_summary(&LineageReport::new());
        assert!(summary.contains("No tables were processed for lineage."));
    }

    #[test]
    fn test_render_catalog() {
        let catalog = CatalogBuilder::new()
            .table("db", "s", "t", [("id", "INT"), ("name", "TEXT")])
            .build();
        let text = render_catalog(&catalog);
        assert!(text.contains(
            "Catalog: db\n  Schema: s\n    Table: t\n      - id INT\n      - name TEXT\n"
        ));
    }
}
