//! Script analyzer module

mod qualify;
mod statement;

use sqlparser::ast::{Expr, Query, Statement, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::dialect::{ScriptParser, ScriptStatement, SqlDialect};
use crate::error::AnalysisError;
use crate::lineage::{cte_names, table_references, LineageResolver};
use crate::report::{LineageReport, SCRIPT_ERROR_KEY};
use crate::schema::Catalog;

pub use qualify::Qualifier;
pub use statement::{StatementAnalyzer, StatementOutcome};

/// Caller-supplied analysis settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerOptions {
    pub dialect: SqlDialect,
    /// Overrides the first catalog of the schema mapping
    pub default_catalog: Option<String>,
    /// Used when the script has no `SET search_path`
    pub default_schema: Option<String>,
    pub max_depth: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::Greenplum,
            default_catalog: None,
            default_schema: None,
            max_depth: LineageResolver::DEFAULT_MAX_DEPTH,
        }
    }
}

/// SQL Analyzer - derives lineage of every `CREATE TABLE ... AS` in a script
pub struct Analyzer<'a> {
    catalog: &'a Catalog,
    options: AnalyzerOptions,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self::with_options(catalog, AnalyzerOptions::default())
    }

    pub fn with_options(catalog: &'a Catalog, options: AnalyzerOptions) -> Self {
        Self { catalog, options }
    }

    /// Analyze a script and return its lineage report
    ///
    /// Never fails: parse errors land under `"script"`, statement and column
    /// failures under the target table.
    pub fn analyze(&self, sql: &str) -> LineageReport {
        let mut report = LineageReport::new();

        let statements = match self.parser().parse(sql) {
            Ok(statements) => statements,
            Err(e) => {
                let error = AnalysisError::from(e);
                warn!(code = error.code(), %error, "script could not be parsed");
                report.add_error(SCRIPT_ERROR_KEY, error.to_string());
                return report;
            }
        };

        let default_schema =
            search_path(&statements).or_else(|| self.options.default_schema.clone());
        let default_catalog = self.default_catalog();
        debug!(
            catalog = default_catalog.unwrap_or("-"),
            schema = default_schema.as_deref().unwrap_or("-"),
            "resolved defaults"
        );

        let analyzer =
            StatementAnalyzer::new(self.catalog, default_catalog, default_schema.as_deref())
                .with_max_depth(self.options.max_depth);

        for script_statement in &statements {
            if let Statement::CreateTable(create) = &script_statement.statement {
                match &create.query {
                    Some(query) => analyzer.analyze(&create.name, query).record(&mut report),
                    None => debug!(table = %create.name, "skipping CREATE TABLE without query"),
                }
            }
        }

        report
    }

    /// Names of all tables the script reads, CTE names excluded
    ///
    /// Used to decide which tables to fetch schema information for. A script
    /// that cannot be parsed yields an empty set.
    pub fn discover_source_tables(&self, sql: &str) -> BTreeSet<String> {
        let statements = match self.parser().parse(sql) {
            Ok(statements) => statements,
            Err(e) => {
                warn!(error = %e, "could not parse script to extract table names");
                return BTreeSet::new();
            }
        };

        let queries: Vec<_> = statements
            .iter()
            .filter_map(|s| statement_query(&s.statement))
            .collect();
        let ctes: BTreeSet<String> = queries.iter().flat_map(|q| cte_names(q)).collect();

        queries
            .iter()
            .flat_map(|q| table_references(q))
            .map(|(_, reference)| reference.name)
            .filter(|name| !ctes.contains(&name.to_lowercase()))
            .collect()
    }

    fn parser(&self) -> ScriptParser {
        ScriptParser::new(self.options.dialect).normalize_identifiers(true)
    }

    fn default_catalog(&self) -> Option<&str> {
        if let Some(catalog) = self.options.default_catalog.as_deref() {
            return Some(catalog);
        }
        let first = self.catalog.first_catalog();
        if self.catalog.catalogs().count() > 1 {
            warn!(
                catalog = first.unwrap_or_default(),
                "schema holds several catalogs; defaulting to the first one"
            );
        }
        first
    }
}

/// The query of a statement that reads tables
fn statement_query(statement: &Statement) -> Option<&Query> {
    match statement {
        Statement::Query(query) => Some(query),
        Statement::CreateTable(create) => create.query.as_deref(),
        Statement::CreateView { query, .. } => Some(query),
        Statement::Insert(insert) => insert.source.as_deref(),
        _ => None,
    }
}

/// First schema of the last `SET search_path` directive
fn search_path(statements: &[ScriptStatement]) -> Option<String> {
    statements.iter().rev().find_map(|s| match &s.statement {
        Statement::SetVariable {
            variables, value, ..
        } if variables
            .iter()
            .any(|v| v.to_string().eq_ignore_ascii_case("search_path")) =>
        {
            value.first().and_then(schema_name)
        }
        _ => None,
    })
}

fn schema_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.clone()),
        Expr::Value(Value::SingleQuotedString(s)) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CatalogBuilder;
    use pretty_assertions::assert_eq;

    fn setup_catalog() -> Catalog {
        CatalogBuilder::new()
            .table("db", "s", "base", [("a", "INT"), ("b", "INT")])
            .table("db", "other", "base", [("z", "INT")])
            .build()
    }

    #[test]
    fn test_search_path_sets_default_schema() {
        let catalog = setup_catalog();
        let report = Analyzer::new(&catalog)
            .analyze("SET search_path TO s; CREATE TABLE t AS SELECT a FROM base;");

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.lineage["db.s.t"].columns["a"].lineage, vec!["db.s.base.a"]);
    }

    #[test]
    fn test_last_search_path_wins() {
        let catalog = setup_catalog();
        let report = Analyzer::new(&catalog).analyze(
            "SET search_path TO s; SET search_path = other, public;
             CREATE TABLE t AS SELECT z FROM base;",
        );
        assert_eq!(report.lineage["db.other.t"].depends_on, vec!["db.other.base"]);
    }

    #[test]
    fn test_configured_defaults() {
        let catalog = setup_catalog();
        let options = AnalyzerOptions {
            default_catalog: Some("warehouse".to_string()),
            default_schema: Some("s".to_string()),
            ..AnalyzerOptions::default()
        };
        let report = Analyzer::with_options(&catalog, options)
            .analyze("CREATE TABLE t AS SELECT a FROM db.s.base");
        assert_eq!(report.lineage["warehouse.s.t"].columns["a"].lineage, vec!["db.s.base.a"]);
    }

    #[test]
    fn test_parse_failure_is_a_script_error() {
        let catalog = setup_catalog();
        let report = Analyzer::new(&catalog).analyze("CREATE TABLE t AS SELEC a FROM base");

        assert!(report.lineage.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors["script"][0].starts_with("Failed to parse the entire SQL script: "));
    }

    #[test]
    fn test_create_without_query_is_ignored() {
        let catalog = setup_catalog();
        let report = Analyzer::new(&catalog).analyze(
            "SET search_path TO s; CREATE TABLE plain (id INT) DISTRIBUTED BY (id); \
             CREATE TABLE t AS SELECT b FROM base DISTRIBUTED RANDOMLY;",
        );
        assert_eq!(report.lineage.keys().collect::<Vec<_>>(), vec!["db.s.t"]);
    }

    #[test]
    fn test_identifiers_are_folded() {
        let catalog = setup_catalog();
        let report = Analyzer::new(&catalog)
            .analyze("SET search_path TO S; CREATE TABLE T AS SELECT A FROM Base;");
        assert_eq!(report.lineage["db.s.t"].columns["a"].lineage, vec!["db.s.base.a"]);
    }

    #[test]
    fn test_discover_source_tables() {
        let catalog = setup_catalog();
        let tables = Analyzer::new(&catalog).discover_source_tables(
            "CREATE TABLE t AS WITH x AS (SELECT id FROM raw.users) \
             SELECT x.id FROM x JOIN orders o ON o.user_id = x.id; \
             INSERT INTO log SELECT * FROM audit;",
        );
        assert_eq!(
            tables.into_iter().collect::<Vec<_>>(),
            vec!["audit", "orders", "users"]
        );
    }

    #[test]
    fn test_discover_source_tables_unparseable() {
        let catalog = setup_catalog();
        assert!(Analyzer::new(&catalog).discover_source_tables("SELEC 1").is_empty());
    }
}
