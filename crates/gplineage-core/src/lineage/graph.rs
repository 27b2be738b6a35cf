//! Per-column dependency graph of a qualified query
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. The builder keeps
//! one node per (scope, column), so a column read twice through different
//! paths is one shared node, and a recursive CTE reference points back at the
//! node that is still being built.

use indexmap::IndexMap;
use sqlparser::ast::{
    Cte, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, Select, SelectItem,
    SetExpr, TableFactor, TableWithJoins, Visit, Visitor, WindowType,
};
use std::collections::HashMap;
use std::ops::{ControlFlow, Index};

use super::projection::{item_output_name, positional_names, synthetic_name};
use crate::error::GraphError;
use crate::schema::{Catalog, TableReference};

/// Index of a node in a [`LineageGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// What a node was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExpression {
    /// Column read straight from a base table
    Table(TableReference),
    /// `alias.column` whose alias names no source of its scope
    Placeholder,
    /// Output column of a SELECT, as SQL text
    Projection(String),
    /// Output column of a set operation, by position
    SetOperation(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    /// Column identifier, `alias.column` for table and placeholder nodes
    pub name: String,
    pub expression: NodeExpression,
    /// Nodes this column is computed from
    pub sources: Vec<NodeId>,
}

/// Dependency graph of one output column
#[derive(Debug, Clone)]
pub struct LineageGraph {
    nodes: Vec<DependencyNode>,
    root: NodeId,
}

impl LineageGraph {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}

impl Index<NodeId> for LineageGraph {
    type Output = DependencyNode;

    fn index(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.0]
    }
}

/// Build the dependency graph of `column`, an output column of `query`
///
/// The query is expected to be qualified already; the catalog only settles
/// unqualified references in scopes with several sources. Walking more than
/// `max_depth` query or set-operation levels below the root fails with
/// [`GraphError::DepthExceeded`].
pub fn build_lineage_graph(
    query: &Query,
    catalog: &Catalog,
    column: &str,
    max_depth: usize,
) -> Result<LineageGraph, GraphError> {
    let mut builder = GraphBuilder {
        catalog,
        max_depth,
        nodes: Vec::new(),
        columns: HashMap::new(),
        leaves: HashMap::new(),
        ctes: Vec::new(),
    };
    let root = builder.query_column(query, Target::Name(column), 0)?;
    Ok(LineageGraph {
        nodes: builder.nodes,
        root,
    })
}

/// Column lookup by output name or by position
#[derive(Debug, Clone, Copy)]
enum Target<'c> {
    Name(&'c str),
    Index(usize),
}

/// A FROM-clause source as seen by the builder
enum SelectSource<'q> {
    Table(TableReference),
    /// CTE or derived table, with its declared column names if any
    Query(&'q Query, Vec<String>),
    Function,
}

/// Sources of one SELECT, keyed by lower-cased alias
struct GraphScope<'q> {
    sources: IndexMap<String, (String, SelectSource<'q>)>,
}

/// A column reference found in a projection
enum ColumnReference<'q> {
    Column {
        qualifier: Option<String>,
        column: String,
    },
    /// Scalar subquery
    Subquery(&'q Query),
}

struct GraphBuilder<'q, 'c> {
    catalog: &'c Catalog,
    max_depth: usize,
    nodes: Vec<DependencyNode>,
    /// (scope address, column index) -> node
    columns: HashMap<(usize, usize), NodeId>,
    /// (scope address, alias.column) -> table or placeholder node
    leaves: HashMap<(usize, String), NodeId>,
    /// Visible CTEs, innermost last
    ctes: Vec<&'q Cte>,
}

impl<'q> GraphBuilder<'q, '_> {
    fn push(&mut self, name: String, expression: NodeExpression) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DependencyNode {
            name,
            expression,
            sources: Vec::new(),
        });
        id
    }

    fn query_column(
        &mut self,
        query: &'q Query,
        target: Target<'_>,
        depth: usize,
    ) -> Result<NodeId, GraphError> {
        let mark = self.ctes.len();
        if let Some(with) = &query.with {
            self.ctes.extend(with.cte_tables.iter());
        }
        let result = self.set_expr_column(&query.body, target, depth);
        self.ctes.truncate(mark);
        result
    }

    fn set_expr_column(
        &mut self,
        set_expr: &'q SetExpr,
        target: Target<'_>,
        depth: usize,
    ) -> Result<NodeId, GraphError> {
        if depth > self.max_depth {
            return Err(GraphError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        match set_expr {
            SetExpr::Select(select) => self.select_column(select, target, depth),
            SetExpr::Query(query) => self.query_column(query, target, depth),
            SetExpr::SetOperation { left, right, .. } => {
                let names = positional_names(set_expr);
                let index = match target {
                    Target::Index(index) => index,
                    Target::Name(name) => names
                        .iter()
                        .position(|n| n.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
                        .ok_or_else(|| GraphError::ColumnNotFound {
                            column: name.to_string(),
                        })?,
                };

                let key = (address(set_expr), index);
                if let Some(&id) = self.columns.get(&key) {
                    return Ok(id);
                }
                let name = names
                    .get(index)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| synthetic_name(index));
                let id = self.push(name, NodeExpression::SetOperation(index));
                self.columns.insert(key, id);

                let left = self.set_expr_column(left, Target::Index(index), depth + 1)?;
                let right = self.set_expr_column(right, Target::Index(index), depth + 1)?;
                self.nodes[id.0].sources = vec![left, right];
                Ok(id)
            }
            other => {
                // VALUES and friends: a column with no upstream
                let (key, name) = match target {
                    Target::Index(index) => ((address(other), index), synthetic_name(index)),
                    Target::Name(name) => ((address(other), usize::MAX), name.to_string()),
                };
                if let Some(&id) = self.columns.get(&key) {
                    return Ok(id);
                }
                let id = self.push(name, NodeExpression::Projection(other.to_string()));
                self.columns.insert(key, id);
                Ok(id)
            }
        }
    }

    fn select_column(
        &mut self,
        select: &'q Select,
        target: Target<'_>,
        depth: usize,
    ) -> Result<NodeId, GraphError> {
        let found = match target {
            Target::Index(index) if index < select.projection.len() => Some(index),
            Target::Index(index) => return Err(GraphError::IndexOutOfRange { index }),
            Target::Name(name) => select.projection.iter().enumerate().position(|(i, item)| {
                item_output_name(item, i).is_some_and(|n| n.eq_ignore_ascii_case(name))
            }),
        };

        let Some(index) = found else {
            return match target {
                Target::Name(column) => self.wildcard_column(select, column, depth),
                Target::Index(index) => Err(GraphError::IndexOutOfRange { index }),
            };
        };

        let key = (address(select), index);
        if let Some(&id) = self.columns.get(&key) {
            return Ok(id);
        }

        let item = &select.projection[index];
        let name = item_output_name(item, index).unwrap_or_else(|| synthetic_name(index));
        let id = self.push(name, NodeExpression::Projection(item.to_string()));
        self.columns.insert(key, id);

        let scope = self.select_scope(select);
        let mut references = Vec::new();
        if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
            collect_references(expr, &mut references);
        }

        let mut sources = Vec::new();
        for reference in references {
            let source = match reference {
                ColumnReference::Column { qualifier, column } => {
                    let qualifier = qualifier.as_deref();
                    self.column_source(select, &scope, qualifier, &column, depth)?
                }
                ColumnReference::Subquery(query) => {
                    self.query_column(query, Target::Index(0), depth + 1)?
                }
            };
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        self.nodes[id.0].sources = sources;
        Ok(id)
    }

    /// A named column that only an unexpanded `*` / `alias.*` can provide
    fn wildcard_column(
        &mut self,
        select: &'q Select,
        column: &str,
        depth: usize,
    ) -> Result<NodeId, GraphError> {
        let qualifier = select.projection.iter().find_map(|item| match item {
            SelectItem::Wildcard(_) => Some(None),
            SelectItem::QualifiedWildcard(name, _) => {
                Some(name.0.last().map(|ident| ident.value.clone()))
            }
            _ => None,
        });
        let Some(qualifier) = qualifier else {
            return Err(GraphError::ColumnNotFound {
                column: column.to_string(),
            });
        };

        let key = (address(select), format!("*{}", column.to_lowercase()));
        if let Some(&id) = self.leaves.get(&key) {
            return Ok(id);
        }
        let id = self.push(column.to_string(), NodeExpression::Projection("*".to_string()));
        self.leaves.insert(key, id);

        let scope = self.select_scope(select);
        let source = self.column_source(select, &scope, qualifier.as_deref(), column, depth)?;
        self.nodes[id.0].sources = vec![source];
        Ok(id)
    }

    fn column_source(
        &mut self,
        select: &'q Select,
        scope: &GraphScope<'q>,
        qualifier: Option<&str>,
        column: &str,
        depth: usize,
    ) -> Result<NodeId, GraphError> {
        let source = match qualifier {
            Some(qualifier) => scope.sources.get(&qualifier.to_lowercase()),
            None => self.sole_owner(scope, column),
        };

        match source {
            Some((alias, SelectSource::Table(reference))) => {
                Ok(self.leaf(select, format!("{}.{}", alias, column), || {
                    NodeExpression::Table(reference.clone())
                }))
            }
            Some((_, SelectSource::Query(query, declared))) => {
                let target = match declared.iter().position(|c| c.eq_ignore_ascii_case(column)) {
                    Some(index) => Target::Index(index),
                    None => Target::Name(column),
                };
                self.query_column(*query, target, depth + 1)
            }
            Some((alias, SelectSource::Function)) => Ok(self.leaf(
                select,
                format!("{}.{}", alias, column),
                || NodeExpression::Placeholder,
            )),
            None => {
                let name = match qualifier {
                    Some(qualifier) => format!("{}.{}", qualifier, column),
                    None => column.to_string(),
                };
                Ok(self.leaf(select, name, || NodeExpression::Placeholder))
            }
        }
    }

    /// Source owning an unqualified column: the only source, or the only
    /// catalog table that has it
    fn sole_owner<'s>(
        &self,
        scope: &'s GraphScope<'q>,
        column: &str,
    ) -> Option<&'s (String, SelectSource<'q>)> {
        if scope.sources.len() == 1 {
            return scope.sources.values().next();
        }
        let mut owners = scope.sources.values().filter(|(_, source)| match source {
            SelectSource::Table(reference) => self
                .catalog
                .find_table(reference)
                .is_some_and(|table| table.column_exists(column)),
            _ => false,
        });
        match (owners.next(), owners.next()) {
            (Some(owner), None) => Some(owner),
            _ => None,
        }
    }

    fn leaf(
        &mut self,
        select: &Select,
        name: String,
        expression: impl FnOnce() -> NodeExpression,
    ) -> NodeId {
        let key = (address(select), name);
        if let Some(&id) = self.leaves.get(&key) {
            return id;
        }
        let id = self.push(key.1.clone(), expression());
        self.leaves.insert(key, id);
        id
    }

    fn select_scope(&self, select: &'q Select) -> GraphScope<'q> {
        let mut scope = GraphScope {
            sources: IndexMap::new(),
        };
        for table in &select.from {
            self.register_table_with_joins(table, &mut scope);
        }
        scope
    }

    fn register_table_with_joins(&self, table: &'q TableWithJoins, scope: &mut GraphScope<'q>) {
        self.register_table_factor(&table.relation, scope);
        for join in &table.joins {
            self.register_table_factor(&join.relation, scope);
        }
    }

    fn register_table_factor(&self, factor: &'q TableFactor, scope: &mut GraphScope<'q>) {
        let (alias, source) = match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                let reference = TableReference::from_object_name(name);
                let key = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| reference.name.clone());
                let source = if args.is_some() {
                    SelectSource::Function
                } else if let Some(cte) = self.visible_cte(&reference) {
                    SelectSource::Query(&cte.query, alias_columns(&cte.alias))
                } else {
                    SelectSource::Table(reference)
                };
                (key, source)
            }
            TableFactor::Derived {
                subquery,
                alias: Some(alias),
                ..
            } => (
                alias.name.value.clone(),
                SelectSource::Query(subquery, alias_columns(alias)),
            ),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.register_table_with_joins(table_with_joins, scope);
                return;
            }
            TableFactor::TableFunction {
                alias: Some(alias), ..
            }
            | TableFactor::Function {
                alias: Some(alias), ..
            }
            | TableFactor::UNNEST {
                alias: Some(alias), ..
            } => (alias.name.value.clone(), SelectSource::Function),
            _ => return,
        };
        scope.sources.insert(alias.to_lowercase(), (alias, source));
    }

    fn visible_cte(&self, reference: &TableReference) -> Option<&'q Cte> {
        if !reference.is_bare() {
            return None;
        }
        self.ctes
            .iter()
            .rev()
            .find(|cte| cte.alias.name.value.eq_ignore_ascii_case(&reference.name))
            .copied()
    }
}

fn alias_columns(alias: &sqlparser::ast::TableAlias) -> Vec<String> {
    alias.columns.iter().map(|c| c.name.value.clone()).collect()
}

fn address<T>(value: &T) -> usize {
    value as *const T as usize
}

/// Collect the column references and scalar subqueries of a projection
///
/// Nested subqueries other than scalar ones are not entered.
fn collect_references<'q>(expr: &'q Expr, out: &mut Vec<ColumnReference<'q>>) {
    match expr {
        Expr::Identifier(ident) => out.push(ColumnReference::Column {
            qualifier: None,
            column: ident.value.clone(),
        }),
        Expr::CompoundIdentifier(idents) => {
            if let [.., qualifier, column] = idents.as_slice() {
                out.push(ColumnReference::Column {
                    qualifier: Some(qualifier.value.clone()),
                    column: column.value.clone(),
                });
            }
        }
        Expr::Subquery(query) => out.push(ColumnReference::Subquery(query)),
        Expr::BinaryOp { left, right, .. } => {
            collect_references(left, out);
            collect_references(right, out);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::Cast { expr, .. }
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::Collate { expr, .. } => collect_references(expr, out),
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                            collect_references(e, out)
                        }
                        FunctionArg::Named { arg, .. } | FunctionArg::ExprNamed { arg, .. } => {
                            if let FunctionArgExpr::Expr(e) = arg {
                                collect_references(e, out);
                            }
                        }
                        _ => {}
                    }
                }
            }
            if let Some(filter) = &func.filter {
                collect_references(filter, out);
            }
            if let Some(WindowType::WindowSpec(spec)) = &func.over {
                for e in &spec.partition_by {
                    collect_references(e, out);
                }
                for ob in &spec.order_by {
                    collect_references(&ob.expr, out);
                }
            }
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(op) = operand {
                collect_references(op, out);
            }
            for e in conditions.iter().chain(results) {
                collect_references(e, out);
            }
            if let Some(e) = else_result {
                collect_references(e, out);
            }
        }
        Expr::Tuple(exprs) => {
            for e in exprs {
                collect_references(e, out);
            }
        }
        Expr::InList { expr, list, .. } => {
            collect_references(expr, out);
            for e in list {
                collect_references(e, out);
            }
        }
        Expr::InSubquery { expr, .. } => collect_references(expr, out),
        Expr::Exists { .. } => {}
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_references(expr, out);
            collect_references(low, out);
            collect_references(high, out);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            collect_references(expr, out);
            collect_references(pattern, out);
        }
        other => collect_remaining(other, out),
    }
}

/// Fallback for the less common expression kinds: plain column references
/// only, subqueries are skipped
fn collect_remaining(expr: &Expr, out: &mut Vec<ColumnReference<'_>>) {
    struct Columns {
        found: Vec<(Option<String>, String)>,
        depth: usize,
    }

    impl Visitor for Columns {
        type Break = ();

        fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
            self.depth += 1;
            ControlFlow::Continue(())
        }

        fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
            self.depth -= 1;
            ControlFlow::Continue(())
        }

        fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
            if self.depth > 0 {
                return ControlFlow::Continue(());
            }
            match expr {
                Expr::Identifier(ident) => self.found.push((None, ident.value.clone())),
                Expr::CompoundIdentifier(idents) => {
                    if let [.., qualifier, column] = idents.as_slice() {
                        self.found
                            .push((Some(qualifier.value.clone()), column.value.clone()));
                    }
                }
                _ => {}
            }
            ControlFlow::Continue(())
        }
    }

    let mut columns = Columns {
        found: Vec::new(),
        depth: 0,
    };
    let _ = expr.visit(&mut columns);
    out.extend(
        columns
            .found
            .into_iter()
            .map(|(qualifier, column)| ColumnReference::Column { qualifier, column }),
    );
}
