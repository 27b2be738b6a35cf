//! Lineage resolver - folds a dependency graph into source columns

use sqlparser::ast::Query;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use super::graph::{build_lineage_graph, DependencyNode, LineageGraph, NodeExpression, NodeId};
use super::{cte_names, table_references};
use crate::error::TraceError;
use crate::schema::{Catalog, TableFqn, TableReference};

/// How a dependency node contributes to lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind<'g> {
    /// Terminal read of a base table column
    BaseTableReference(&'g TableReference),
    /// `alias.column` to be resolved through the query's table aliases
    AliasPlaceholderReference,
    /// Anything else: lineage is the union of the node's sources
    IntermediateExpression,
}

/// Classify a node; table nodes naming a CTE are intermediate
pub fn classify<'g>(node: &'g DependencyNode, cte_names: &HashSet<String>) -> NodeKind<'g> {
    match &node.expression {
        NodeExpression::Table(reference)
            if !(reference.is_bare() && cte_names.contains(&reference.name.to_lowercase())) =>
        {
            NodeKind::BaseTableReference(reference)
        }
        NodeExpression::Placeholder => NodeKind::AliasPlaceholderReference,
        _ => NodeKind::IntermediateExpression,
    }
}

/// Resolves output columns to `"TableFQN.column"` source strings
pub struct LineageResolver<'a> {
    catalog: &'a Catalog,
    default_catalog: Option<&'a str>,
    default_schema: Option<&'a str>,
    max_depth: usize,
}

impl<'a> LineageResolver<'a> {
    pub const DEFAULT_MAX_DEPTH: usize = 256;

    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            default_catalog: None,
            default_schema: None,
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_defaults(
        mut self,
        default_catalog: Option<&'a str>,
        default_schema: Option<&'a str>,
    ) -> Self {
        self.default_catalog = default_catalog;
        self.default_schema = default_schema;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Trace one output column of a qualified query to its base columns
    pub fn trace(&self, query: &Query, column: &str) -> Result<BTreeSet<String>, TraceError> {
        let graph = build_lineage_graph(query, self.catalog, column, self.max_depth)?;
        let ctes = cte_names(query);

        let mut aliases = HashMap::new();
        for (alias, reference) in table_references(query) {
            if reference.is_bare() && ctes.contains(&reference.name.to_lowercase()) {
                continue;
            }
            let key = alias.unwrap_or_else(|| reference.name.clone()).to_lowercase();
            let fqn = TableFqn::resolve(&reference, self.default_catalog, self.default_schema);
            aliases.insert(key, fqn);
        }

        let mut fold = Fold {
            resolver: self,
            graph: &graph,
            ctes: &ctes,
            aliases: &aliases,
            memo: HashMap::new(),
        };
        let lineage = fold.lineage(graph.root(), 0)?;
        debug!(column, nodes = graph.len(), sources = lineage.len(), "traced column");
        Ok(lineage)
    }
}

/// One traversal of one graph
struct Fold<'f, 'a> {
    resolver: &'f LineageResolver<'a>,
    graph: &'f LineageGraph,
    ctes: &'f HashSet<String>,
    aliases: &'f HashMap<String, TableFqn>,
    memo: HashMap<NodeId, BTreeSet<String>>,
}

impl Fold<'_, '_> {
    fn lineage(&mut self, id: NodeId, depth: usize) -> Result<BTreeSet<String>, TraceError> {
        if depth > self.resolver.max_depth {
            return Err(TraceError::DepthExceeded {
                limit: self.resolver.max_depth,
            });
        }
        if let Some(done) = self.memo.get(&id) {
            return Ok(done.clone());
        }

        let node = &self.graph[id];
        let result = match classify(node, self.ctes) {
            NodeKind::BaseTableReference(reference) => {
                let fqn = TableFqn::resolve(
                    reference,
                    self.resolver.default_catalog,
                    self.resolver.default_schema,
                );
                let column = node.name.rsplit('.').next().unwrap_or(&node.name);
                BTreeSet::from([fqn.column(column)])
            }
            NodeKind::AliasPlaceholderReference => {
                let resolved = node.name.rsplit_once('.').and_then(|(alias, column)| {
                    self.aliases
                        .get(&alias.to_lowercase())
                        .map(|fqn| fqn.column(column))
                });
                match resolved {
                    Some(source) => BTreeSet::from([source]),
                    None => self.union_of_sources(node, depth)?,
                }
            }
            NodeKind::IntermediateExpression => self.union_of_sources(node, depth)?,
        };

        self.memo.insert(id, result.clone());
        Ok(result)
    }

    fn union_of_sources(
        &mut self,
        node: &DependencyNode,
        depth: usize,
    ) -> Result<BTreeSet<String>, TraceError> {
        let mut lineage = BTreeSet::new();
        for &source in &node.sources {
            lineage.extend(self.lineage(source, depth + 1)?);
        }
        Ok(lineage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Qualifier;
    use crate::schema::CatalogBuilder;
    use pretty_assertions::assert_eq;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn setup_catalog() -> Catalog {
        CatalogBuilder::new()
            .table("db", "s", "base", [("a", "INT"), ("b", "INT")])
            .table("db", "s", "other", [("c", "INT")])
            .build()
    }

    fn trace_with(
        resolver: &LineageResolver<'_>,
        sql: &str,
        column: &str,
    ) -> Result<Vec<String>, TraceError> {
        let query = match Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap().remove(0) {
            Statement::Query(query) => query,
            other => panic!("not a query: {other}"),
        };
        let qualified = Qualifier::new(resolver.catalog)
            .with_defaults(resolver.default_catalog, resolver.default_schema)
            .qualify(&query)
            .unwrap();
        resolver
            .trace(&qualified, column)
            .map(|set| set.into_iter().collect())
    }

    fn trace(sql: &str, column: &str) -> Result<Vec<String>, TraceError> {
        let catalog = setup_catalog();
        let resolver = LineageResolver::new(&catalog).with_defaults(Some("db"), Some("s"));
        trace_with(&resolver, sql, column)
    }

    #[test]
    fn test_base_column() {
        assert_eq!(trace("SELECT a FROM base", "a").unwrap(), vec!["db.s.base.a"]);
    }

    #[test]
    fn test_lineage_is_sorted_and_deduplicated() {
        assert_eq!(
            trace("SELECT b + a + b AS x FROM base", "x").unwrap(),
            vec!["db.s.base.a", "db.s.base.b"]
        );
    }

    #[test]
    fn test_cte_is_never_a_source() {
        let lineage = trace("WITH x AS (SELECT a FROM base) SELECT a FROM x", "a").unwrap();
        assert_eq!(lineage, vec!["db.s.base.a"]);
    }

    #[test]
    fn test_placeholder_resolved_through_alias_map() {
        let lineage = trace(
            "SELECT (SELECT b.a + o.c FROM other o LIMIT 1) AS m FROM base b",
            "m",
        )
        .unwrap();
        assert_eq!(lineage, vec!["db.s.base.a", "db.s.other.c"]);
    }

    #[test]
    fn test_literal_has_no_lineage() {
        assert!(trace("SELECT 1 AS one FROM base", "one").unwrap().is_empty());
    }

    #[test]
    fn test_recursive_cte_exceeds_depth() {
        let err = trace(
            "WITH RECURSIVE r AS (SELECT a FROM base UNION ALL SELECT a + 1 FROM r) \
             SELECT a FROM r",
            "a",
        )
        .unwrap_err();
        assert_eq!(err, TraceError::DepthExceeded { limit: 256 });
    }

    #[test]
    fn test_custom_depth_limit() {
        let catalog = setup_catalog();
        let resolver = LineageResolver::new(&catalog)
            .with_defaults(Some("db"), Some("s"))
            .with_max_depth(1);
        let sql = "WITH x AS (SELECT a FROM base), y AS (SELECT a FROM x) SELECT a FROM y";
        let err = trace_with(&resolver, sql, "a").unwrap_err();
        assert_eq!(err, TraceError::DepthExceeded { limit: 1 });
    }

    #[test]
    fn test_missing_column_is_a_graph_error() {
        let err = trace("SELECT a FROM base", "zzz").unwrap_err();
        assert!(matches!(err, TraceError::Graph(_)));
    }

    #[test]
    fn test_classify() {
        let ctes = HashSet::from(["x".to_string()]);
        let base = DependencyNode {
            name: "t.a".to_string(),
            expression: NodeExpression::Table(TableReference::new("t")),
            sources: vec![],
        };
        assert!(matches!(classify(&base, &ctes), NodeKind::BaseTableReference(_)));

        let cte = DependencyNode {
            expression: NodeExpression::Table(TableReference::new("x")),
            ..base.clone()
        };
        assert_eq!(classify(&cte, &ctes), NodeKind::IntermediateExpression);

        let placeholder = DependencyNode {
            expression: NodeExpression::Placeholder,
            ..base
        };
        assert_eq!(classify(&placeholder, &ctes), NodeKind::AliasPlaceholderReference);
    }
}
