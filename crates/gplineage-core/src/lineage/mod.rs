//! Column lineage
//!
//! [`StarExpander`] and the qualifier prepare a statement's query; then, for
//! each output column, [`build_lineage_graph`] builds its dependency graph
//! and [`LineageResolver`] folds the graph into base-table columns.

mod graph;
pub(crate) mod projection;
mod resolver;
mod star;

use sqlparser::ast::{Query, TableFactor, Visit, Visitor};
use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::schema::TableReference;

pub use graph::{build_lineage_graph, DependencyNode, LineageGraph, NodeExpression, NodeId};
pub use resolver::{classify, LineageResolver, NodeKind};
pub use star::{cte_output_columns, StarExpander};

/// Lower-cased names of every CTE declared anywhere in the query
pub fn cte_names(query: &Query) -> HashSet<String> {
    struct Names(HashSet<String>);

    impl Visitor for Names {
        type Break = ();

        fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
            for cte in query.with.iter().flat_map(|w| &w.cte_tables) {
                self.0.insert(cte.alias.name.value.to_lowercase());
            }
            ControlFlow::Continue(())
        }
    }

    let mut names = Names(HashSet::new());
    let _ = query.visit(&mut names);
    names.0
}

/// Every table reference in the query with its alias, table functions excluded
pub fn table_references(query: &Query) -> Vec<(Option<String>, TableReference)> {
    struct Tables(Vec<(Option<String>, TableReference)>);

    impl Visitor for Tables {
        type Break = ();

        fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
            if let TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            } = factor
            {
                self.0.push((
                    alias.as_ref().map(|a| a.name.value.clone()),
                    TableReference::from_object_name(name),
                ));
            }
            ControlFlow::Continue(())
        }
    }

    let mut tables = Tables(Vec::new());
    let _ = query.visit(&mut tables);
    tables.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn query(sql: &str) -> Query {
        match Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap().remove(0) {
            Statement::Query(query) => *query,
            other => panic!("not a query: {other}"),
        }
    }

    #[test]
    fn test_cte_names_include_nested() {
        let q =
            query("WITH A AS (SELECT 1) SELECT * FROM (WITH b AS (SELECT 2) SELECT * FROM b) t");
        let names = cte_names(&q);
        assert!(names.contains("a"));
        assert!(names.contains("b"));
    }

    #[test]
    fn test_table_references_skip_functions() {
        let q = query(
            "SELECT * FROM s.orders o JOIN users ON true, generate_series(1, 3) g \
             WHERE EXISTS (SELECT 1 FROM audit)",
        );
        let tables: Vec<_> = table_references(&q)
            .into_iter()
            .map(|(alias, reference)| (alias, reference.to_string()))
            .collect();
        assert_eq!(
            tables,
            vec![
                (Some("o".to_string()), "s.orders".to_string()),
                (None, "users".to_string()),
                (None, "audit".to_string()),
            ]
        );
    }
}
