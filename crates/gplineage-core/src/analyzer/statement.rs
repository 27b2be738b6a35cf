//! Analysis of one `CREATE TABLE ... AS` statement

use sqlparser::ast::{ObjectName, Query};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::qualify::Qualifier;
use crate::error::AnalysisError;
use crate::lineage::projection::{output_names, unwrap_parenthesized};
use crate::lineage::{
    cte_names, cte_output_columns, table_references, LineageResolver, StarExpander,
};
use crate::report::{ColumnLineage, LineageReport, TableLineage};
use crate::schema::{Catalog, TableFqn};

/// Result of analyzing one statement
///
/// `lineage` is `None` when the statement was aborted; `errors` then holds
/// the reason. Column failures leave `lineage` in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementOutcome {
    pub target: TableFqn,
    pub lineage: Option<TableLineage>,
    pub errors: Vec<AnalysisError>,
}

impl StatementOutcome {
    /// Fold into a report; later statements overwrite the same target
    pub fn record(self, report: &mut LineageReport) {
        let key = self.target.to_string();
        for error in self.errors {
            report.add_error(key.clone(), error.to_string());
        }
        if let Some(lineage) = self.lineage {
            report.lineage.insert(key, lineage);
        }
    }
}

/// Analyzer for single target statements
pub struct StatementAnalyzer<'a> {
    catalog: &'a Catalog,
    default_catalog: Option<&'a str>,
    default_schema: Option<&'a str>,
    max_depth: usize,
}

impl<'a> StatementAnalyzer<'a> {
    pub fn new(
        catalog: &'a Catalog,
        default_catalog: Option<&'a str>,
        default_schema: Option<&'a str>,
    ) -> Self {
        Self {
            catalog,
            default_catalog,
            default_schema,
            max_depth: LineageResolver::DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Analyze `CREATE TABLE <target> AS <query>`
    pub fn analyze(&self, target: &ObjectName, query: &Query) -> StatementOutcome {
        let target = TableFqn::from_object_name(target, self.default_catalog, self.default_schema);
        debug!(target = %target, "analyzing statement");

        let mut query = unwrap_parenthesized(query.clone());
        let cte_columns = cte_output_columns(&query);
        StarExpander::new(self.catalog, self.default_catalog, self.default_schema)
            .expand(&mut query, &cte_columns);

        let qualified = match Qualifier::new(self.catalog)
            .with_defaults(self.default_catalog, self.default_schema)
            .qualify(&query)
        {
            Ok(qualified) => qualified,
            Err(e) => {
                let error = AnalysisError::from(e);
                warn!(target = %target, code = error.code(), %error, "statement aborted");
                return StatementOutcome {
                    target,
                    lineage: None,
                    errors: vec![error],
                };
            }
        };

        let resolver = LineageResolver::new(self.catalog)
            .with_defaults(self.default_catalog, self.default_schema)
            .with_max_depth(self.max_depth);
        let mut lineage = TableLineage {
            depends_on: self.dependencies(&qualified),
            ..TableLineage::default()
        };
        let mut errors = Vec::new();

        for column in output_names(&qualified.body) {
            match resolver.trace(&qualified, &column) {
                Ok(sources) if sources.is_empty() => {
                    debug!(target = %target, column, "column has no source columns");
                }
                Ok(sources) => {
                    lineage.columns.insert(
                        column,
                        ColumnLineage {
                            lineage: sources.into_iter().collect(),
                        },
                    );
                }
                Err(source) => {
                    let error = AnalysisError::ColumnTrace { column, source };
                    warn!(target = %target, code = error.code(), %error, "column skipped");
                    errors.push(error);
                }
            }
        }

        StatementOutcome {
            target,
            lineage: Some(lineage),
            errors,
        }
    }

    /// Sorted FQNs of all base tables read by the qualified query
    fn dependencies(&self, query: &Query) -> Vec<String> {
        let ctes = cte_names(query);
        table_references(query)
            .into_iter()
            .filter(|(_, reference)| {
                !(reference.is_bare() && ctes.contains(&reference.name.to_lowercase()))
            })
            .map(|(_, reference)| {
                TableFqn::resolve(&reference, self.default_catalog, self.default_schema).to_string()
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{QualifyError, TraceError};
    use crate::schema::CatalogBuilder;
    use pretty_assertions::assert_eq;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn setup_catalog() -> Catalog {
        CatalogBuilder::new()
            .table("db", "s", "base", [("a", "INT"), ("b", "INT")])
            .table("db", "s", "customers", [("name", "TEXT"), ("id", "INT")])
            .table(
                "db",
                "s",
                "orders",
                [("id", "INT"), ("customer_id", "INT"), ("amount", "NUMERIC")],
            )
            .build()
    }

    fn analyze(catalog: &Catalog, sql: &str) -> StatementOutcome {
        let Statement::CreateTable(create) = Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .unwrap()
            .remove(0)
        else {
            panic!("not a CREATE TABLE: {sql}");
        };
        let query = create.query.expect("CTAS");
        StatementAnalyzer::new(catalog, Some("db"), Some("s")).analyze(&create.name, &query)
    }

    fn columns(outcome: &StatementOutcome) -> Vec<(String, Vec<String>)> {
        outcome
            .lineage
            .as_ref()
            .unwrap()
            .columns
            .iter()
            .map(|(name, column)| (name.clone(), column.lineage.clone()))
            .collect()
    }

    #[test]
    fn test_simple_ctas() {
        let outcome = analyze(&setup_catalog(), "CREATE TABLE t AS SELECT a, b FROM base");
        assert_eq!(outcome.target.to_string(), "db.s.t");
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.lineage.as_ref().unwrap().depends_on, vec!["db.s.base"]);
        assert_eq!(
            columns(&outcome),
            vec![
                ("a".to_string(), vec!["db.s.base.a".to_string()]),
                ("b".to_string(), vec!["db.s.base.b".to_string()]),
            ]
        );
    }

    #[test]
    fn test_parenthesized_query_with_cte() {
        let outcome = analyze(
            &setup_catalog(),
            "CREATE TABLE t AS (WITH x AS (SELECT id, amount FROM orders) \
             SELECT id, amount * 2 AS doubled FROM x)",
        );
        assert_eq!(outcome.lineage.as_ref().unwrap().depends_on, vec!["db.s.orders"]);
        assert_eq!(
            columns(&outcome),
            vec![
                ("id".to_string(), vec!["db.s.orders.id".to_string()]),
                ("doubled".to_string(), vec!["db.s.orders.amount".to_string()]),
            ]
        );
    }

    #[test]
    fn test_star_inside_function() {
        let outcome = analyze(
            &setup_catalog(),
            "CREATE TABLE t AS SELECT c.id, row_to_json(c.*) AS doc FROM customers c",
        );
        assert_eq!(
            columns(&outcome)[1],
            (
                "doc".to_string(),
                vec!["db.s.customers.id".to_string(), "db.s.customers.name".to_string()]
            )
        );
    }

    #[test]
    fn test_literal_columns_are_not_recorded() {
        let outcome = analyze(&setup_catalog(), "CREATE TABLE t AS SELECT a, 'x' AS tag FROM base");
        assert_eq!(columns(&outcome).len(), 1);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_qualify_failure_aborts_statement() {
        let outcome = analyze(
            &setup_catalog(),
            "CREATE TABLE t AS SELECT id FROM customers c JOIN orders o ON c.id = o.customer_id",
        );
        assert!(outcome.lineage.is_none());
        assert!(matches!(
            outcome.errors.as_slice(),
            [AnalysisError::StatementAnalysis(QualifyError::AmbiguousColumn { .. })]
        ));
    }

    #[test]
    fn test_recursive_cte_fails_per_column() {
        let outcome = analyze(
            &setup_catalog(),
            "CREATE TABLE t AS WITH RECURSIVE r AS \
             (SELECT a, b FROM base UNION ALL SELECT a + 1, b FROM r) SELECT a, b FROM r",
        );
        assert_eq!(outcome.errors.len(), 2);
        assert!(matches!(
            &outcome.errors[0],
            AnalysisError::ColumnTrace {
                column,
                source: TraceError::DepthExceeded { .. },
            } if column == "a"
        ));
        assert_eq!(outcome.lineage.as_ref().unwrap().depends_on, vec!["db.s.base"]);
    }

    #[test]
    fn test_record_into_report() {
        let catalog = setup_catalog();
        let mut report = LineageReport::new();
        analyze(&catalog, "CREATE TABLE t AS SELECT a FROM base").record(&mut report);
        analyze(
            &catalog,
            "CREATE TABLE u AS SELECT id FROM customers c JOIN orders o ON c.id = o.customer_id",
        )
        .record(&mut report);

        assert_eq!(report.lineage.keys().collect::<Vec<_>>(), vec!["db.s.t"]);
        assert_eq!(report.errors.keys().collect::<Vec<_>>(), vec!["db.s.u"]);
        assert!(report.errors["db.s.u"][0]
            .starts_with("Could not analyze statement: Column 'id' is ambiguous"));
    }
}
