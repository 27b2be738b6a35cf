//! Qualifier - qualifies table and column references
//!
//! Walks a query scope by scope, the way a name resolver does, and rewrites it
//! so that lineage can be read off the tree directly:
//!
//! * base tables get the default schema (and catalog) attached
//! * projection wildcards are expanded when the source columns are known
//! * unqualified columns get the alias of the source that owns them
//! * every projection gets an explicit output alias

use indexmap::IndexMap;
use sqlparser::ast::{
    Distinct, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArgumentList,
    FunctionArguments, GroupByExpr, Ident, JoinConstraint, JoinOperator, ObjectName, Query, Select,
    SelectItem, SetExpr, TableAlias, TableFactor, TableWithJoins, Value, VisitMut, VisitorMut,
};
use std::ops::{ControlFlow, Range};
use tracing::debug;

use crate::error::QualifyError;
use crate::lineage::projection::{
    expr_output_name, item_output_name, known_output_names, synthetic_name,
};
use crate::schema::{Catalog, TableReference};

/// Columns a FROM-clause source exposes
#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceColumns {
    Known(Vec<String>),
    /// Table function, unexpanded wildcard or table missing from the catalog
    Unknown,
}

impl SourceColumns {
    fn contains(&self, column: &str) -> bool {
        match self {
            SourceColumns::Known(columns) => {
                columns.iter().any(|c| c.eq_ignore_ascii_case(column))
            }
            SourceColumns::Unknown => false,
        }
    }

    fn from_alias(alias: &TableAlias) -> Option<Self> {
        if alias.columns.is_empty() {
            None
        } else {
            Some(SourceColumns::Known(
                alias.columns.iter().map(|c| c.name.value.clone()).collect(),
            ))
        }
    }
}

#[derive(Debug, Clone)]
struct Source {
    alias: Ident,
    columns: SourceColumns,
}

/// Sources of one SELECT, keyed by lower-cased alias
#[derive(Debug, Clone, Default)]
struct Scope {
    sources: IndexMap<String, Source>,
    /// Columns merged by `JOIN ... USING` or `NATURAL JOIN`, with the
    /// aliases of every joined source that provides them
    merged: IndexMap<String, (Ident, Vec<Ident>)>,
}

impl Scope {
    fn register(&mut self, alias: Ident, columns: SourceColumns) {
        self.sources
            .insert(alias.value.to_lowercase(), Source { alias, columns });
    }

    fn sources_in(&self, range: Range<usize>) -> impl Iterator<Item = &Source> {
        self.sources.values().skip(range.start).take(range.len())
    }

    /// Aliases of the sources in `range` providing `column`
    fn owners(&self, range: Range<usize>, column: &str) -> Vec<Ident> {
        if let Some((_, owners)) = self.merged.get(&column.to_lowercase()) {
            let owners: Vec<Ident> = owners
                .iter()
                .filter(|alias| {
                    self.sources
                        .get_index_of(&alias.value.to_lowercase())
                        .is_some_and(|i| range.contains(&i))
                })
                .cloned()
                .collect();
            if !owners.is_empty() {
                return owners;
            }
        }

        let known: Vec<Ident> = self
            .sources_in(range.clone())
            .filter(|s| s.columns.contains(column))
            .map(|s| s.alias.clone())
            .collect();
        if !known.is_empty() {
            return known;
        }
        self.sources_in(range)
            .filter(|s| s.columns == SourceColumns::Unknown)
            .map(|s| s.alias.clone())
            .collect()
    }

    /// Record a join column shared by the sources in `left` and `right`
    fn merge(&mut self, column: Ident, left: Range<usize>, right: Range<usize>) {
        let mut owners = self.owners(left, &column.value);
        for alias in self.owners(right, &column.value) {
            if !owners.contains(&alias) {
                owners.push(alias);
            }
        }
        if !owners.is_empty() {
            self.merged
                .insert(column.value.to_lowercase(), (column, owners));
        }
    }

    /// Known column names both sides of a NATURAL join have
    fn common_columns(&self, left: Range<usize>, right: Range<usize>) -> Vec<Ident> {
        let known = |range: Range<usize>| -> Vec<String> {
            self.sources_in(range)
                .filter_map(|s| match &s.columns {
                    SourceColumns::Known(columns) => Some(columns.clone()),
                    SourceColumns::Unknown => None,
                })
                .flatten()
                .collect()
        };
        let right = known(right);
        let mut common: Vec<Ident> = Vec::new();
        for column in known(left) {
            let shared = right.iter().any(|c| c.eq_ignore_ascii_case(&column));
            let seen = common.iter().any(|c| c.value.eq_ignore_ascii_case(&column));
            if shared && !seen {
                common.push(Ident::new(column));
            }
        }
        common
    }

    fn get(&self, alias: &str) -> Option<&Source> {
        self.sources.get(&alias.to_lowercase())
    }

    /// Every source's columns in FROM order, if all of them are known
    fn all_columns(&self) -> Option<Vec<(Ident, String)>> {
        if self.sources.is_empty() {
            return None;
        }
        let mut columns = Vec::new();
        for source in self.sources.values() {
            match &source.columns {
                SourceColumns::Known(names) => {
                    columns.extend(names.iter().map(|n| (source.alias.clone(), n.clone())))
                }
                SourceColumns::Unknown => return None,
            }
        }
        Some(columns)
    }
}

/// Qualifier for lineage analysis
pub struct Qualifier<'a> {
    catalog: &'a Catalog,
    default_catalog: Option<&'a str>,
    default_schema: Option<&'a str>,
}

impl<'a> Qualifier<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            default_catalog: None,
            default_schema: None,
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

    /// Return a qualified copy of the query
    pub fn qualify(&self, query: &Query) -> Result<Query, QualifyError> {
        let mut qualified = query.clone();
        let mut walker = ScopeWalker {
            qualifier: self,
            ctes: Vec::new(),
            scopes: Vec::new(),
        };
        walker.qualify_query(&mut qualified)?;
        Ok(qualified)
    }

    /// Prefix missing schema/catalog parts of a base table name
    fn qualify_table_name(&self, name: &mut ObjectName) {
        let reference = TableReference::from_object_name(name);
        let mut prefix = Vec::new();

        let has_schema = reference.schema.is_some() || self.default_schema.is_some();
        if reference.catalog.is_none() && has_schema {
            if let Some(catalog) = self.default_catalog {
                prefix.push(Ident::new(catalog));
            }
        }
        if reference.schema.is_none() {
            if let Some(schema) = self.default_schema {
                prefix.push(Ident::new(schema));
            }
        }

        name.0.splice(0..0, prefix);
    }

    fn table_columns(&self, reference: &TableReference) -> SourceColumns {
        match self
            .catalog
            .lookup(reference, self.default_catalog, self.default_schema)
        {
            Some(table) => SourceColumns::Known(
                table.column_names().into_iter().map(str::to_string).collect(),
            ),
            None => {
                debug!(table = %reference, "table not found in catalog");
                SourceColumns::Unknown
            }
        }
    }
}

/// Mutable walk state: visible CTEs and enclosing scopes, innermost last
struct ScopeWalker<'q, 'a> {
    qualifier: &'q Qualifier<'a>,
    ctes: Vec<(String, SourceColumns)>,
    scopes: Vec<Scope>,
}

impl ScopeWalker<'_, '_> {
    fn qualify_query(&mut self, query: &mut Query) -> Result<SourceColumns, QualifyError> {
        let mark = self.ctes.len();
        let result = self.qualify_query_in_place(query);
        self.ctes.truncate(mark);
        result
    }

    fn qualify_query_in_place(&mut self, query: &mut Query) -> Result<SourceColumns, QualifyError> {
        if let Some(with) = &mut query.with {
            let recursive = with.recursive;
            for cte in &mut with.cte_tables {
                let name = cte.alias.name.value.to_lowercase();
                let declared = SourceColumns::from_alias(&cte.alias);

                // Recursive CTEs are visible inside their own body
                if recursive {
                    let columns = declared.clone().unwrap_or_else(|| {
                        known_output_names(&cte.query)
                            .map_or(SourceColumns::Unknown, SourceColumns::Known)
                    });
                    self.ctes.push((name.clone(), columns));
                }

                let columns = self.qualify_query(&mut cte.query)?;

                if recursive {
                    self.ctes.pop();
                }
                self.ctes.push((name, declared.unwrap_or(columns)));
            }
        }

        let (columns, scope) = self.qualify_set_expr(&mut query.body)?;

        // ORDER BY may name output columns as well as source columns
        if let Some(order_by) = &mut query.order_by {
            let aliases = match &columns {
                SourceColumns::Known(names) => names.clone(),
                SourceColumns::Unknown => Vec::new(),
            };
            let pushed = scope.is_some();
            if let Some(scope) = scope {
                self.scopes.push(scope);
            }
            let mut result = Ok(());
            for order in &mut order_by.exprs {
                result = self.qualify_expr(&mut order.expr, &aliases);
                if result.is_err() {
                    break;
                }
            }
            if pushed {
                self.scopes.pop();
            }
            result?;
        }

        Ok(columns)
    }

    fn qualify_set_expr(
        &mut self,
        set_expr: &mut SetExpr,
    ) -> Result<(SourceColumns, Option<Scope>), QualifyError> {
        match set_expr {
            SetExpr::Select(select) => {
                let (columns, scope) = self.qualify_select(select)?;
                Ok((columns, Some(scope)))
            }
            SetExpr::Query(query) => Ok((self.qualify_query(query)?, None)),
            SetExpr::SetOperation { left, right, .. } => {
                // Output names come from the left-most branch
                let (columns, _) = self.qualify_set_expr(left)?;
                self.qualify_set_expr(right)?;
                Ok((columns, None))
            }
            SetExpr::Values(values) => {
                let width = values.rows.first().map_or(0, Vec::len);
                let columns = (1..=width).map(|i| format!("column{}", i)).collect();
                Ok((SourceColumns::Known(columns), None))
            }
            _ => Ok((SourceColumns::Unknown, None)),
        }
    }

    fn qualify_select(
        &mut self,
        select: &mut Select,
    ) -> Result<(SourceColumns, Scope), QualifyError> {
        // First, resolve FROM clause to build table scope
        let mut scope = Scope::default();
        for table in &mut select.from {
            self.register_table_with_joins(table, &mut scope)?;
        }

        expand_wildcards(select, &scope);
        let names: Vec<Option<String>> = select
            .projection
            .iter()
            .enumerate()
            .map(|(i, item)| item_output_name(item, i))
            .collect();

        self.scopes.push(scope);
        let result = self.qualify_select_clauses(select, &names);
        let scope = self.scopes.pop().unwrap_or_default();
        result?;

        let columns = names
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .map_or(SourceColumns::Unknown, SourceColumns::Known);
        Ok((columns, scope))
    }

    fn qualify_select_clauses(
        &mut self,
        select: &mut Select,
        names: &[Option<String>],
    ) -> Result<(), QualifyError> {
        for table in &mut select.from {
            self.qualify_join_constraints(table)?;
        }

        for (index, item) in select.projection.iter_mut().enumerate() {
            if let SelectItem::UnnamedExpr(expr) = item {
                let alias =
                    expr_output_name(expr).unwrap_or_else(|| Ident::new(synthetic_name(index)));
                let expr = std::mem::replace(expr, Expr::Value(Value::Null));
                *item = SelectItem::ExprWithAlias { expr, alias };
            }
            if let SelectItem::ExprWithAlias { expr, .. } = item {
                self.qualify_expr(expr, &[])?;
            }
        }

        if let Some(Distinct::On(exprs)) = &mut select.distinct {
            for expr in exprs {
                self.qualify_expr(expr, &[])?;
            }
        }

        if let Some(selection) = &mut select.selection {
            self.qualify_expr(selection, &[])?;
        }

        // GROUP BY and HAVING may refer to projection aliases
        let aliases: Vec<String> = names.iter().flatten().cloned().collect();
        if let GroupByExpr::Expressions(exprs, _) = &mut select.group_by {
            for expr in exprs {
                self.qualify_expr(expr, &aliases)?;
            }
        }
        if let Some(having) = &mut select.having {
            self.qualify_expr(having, &aliases)?;
        }

        Ok(())
    }

    fn register_table_with_joins(
        &mut self,
        table: &mut TableWithJoins,
        scope: &mut Scope,
    ) -> Result<(), QualifyError> {
        let start = scope.sources.len();
        self.register_table_factor(&mut table.relation, scope)?;
        for join in &mut table.joins {
            let split = scope.sources.len();
            self.register_table_factor(&mut join.relation, scope)?;
            let (left, right) = (start..split, split..scope.sources.len());

            let columns = match join_constraint(&mut join.join_operator) {
                Some(JoinConstraint::Using(columns)) => columns.clone(),
                Some(JoinConstraint::Natural) => scope.common_columns(left.clone(), right.clone()),
                _ => continue,
            };
            for column in columns {
                scope.merge(column, left.clone(), right.clone());
            }
        }
        Ok(())
    }

    fn register_table_factor(
        &mut self,
        factor: &mut TableFactor,
        scope: &mut Scope,
    ) -> Result<(), QualifyError> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                // Table-valued function call (e.g., generate_series(...))
                if args.is_some() {
                    if let Some(alias) = alias {
                        let columns =
                            SourceColumns::from_alias(alias).unwrap_or(SourceColumns::Unknown);
                        scope.register(alias.name.clone(), columns);
                    }
                    return Ok(());
                }

                let alias = alias.as_ref().map(|a| a.name.clone());

                // CTE references stay unqualified
                if let [table] = name.0.as_slice() {
                    if let Some(columns) = self.cte_columns(&table.value) {
                        scope.register(alias.unwrap_or_else(|| table.clone()), columns);
                        return Ok(());
                    }
                }

                self.qualifier.qualify_table_name(name);
                let reference = TableReference::from_object_name(name);
                let columns = self.qualifier.table_columns(&reference);
                let key = alias
                    .or_else(|| name.0.last().cloned())
                    .unwrap_or_else(|| Ident::new(&reference.name));
                scope.register(key, columns);
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                // LATERAL subqueries can see the FROM items before them
                let columns = if *lateral {
                    self.scopes.push(scope.clone());
                    let result = self.qualify_query(subquery);
                    self.scopes.pop();
                    result?
                } else {
                    self.qualify_query(subquery)?
                };
                if let Some(alias) = alias {
                    let columns = SourceColumns::from_alias(alias).unwrap_or(columns);
                    scope.register(alias.name.clone(), columns);
                }
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.register_table_with_joins(table_with_joins, scope)?;
            }
            TableFactor::TableFunction { alias, .. }
            | TableFactor::Function { alias, .. }
            | TableFactor::UNNEST { alias, .. } => {
                if let Some(alias) = alias {
                    let columns =
                        SourceColumns::from_alias(alias).unwrap_or(SourceColumns::Unknown);
                    scope.register(alias.name.clone(), columns);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn qualify_join_constraints(&mut self, table: &mut TableWithJoins) -> Result<(), QualifyError> {
        if let TableFactor::NestedJoin {
            table_with_joins, ..
        } = &mut table.relation
        {
            self.qualify_join_constraints(table_with_joins)?;
        }

        for join in &mut table.joins {
            if let TableFactor::NestedJoin {
                table_with_joins, ..
            } = &mut join.relation
            {
                self.qualify_join_constraints(table_with_joins)?;
            }
            if let Some(JoinConstraint::On(expr)) = join_constraint(&mut join.join_operator) {
                self.qualify_expr(expr, &[])?;
            }
        }
        Ok(())
    }

    fn qualify_expr(&mut self, expr: &mut Expr, aliases: &[String]) -> Result<(), QualifyError> {
        let mut visitor = ColumnQualifier {
            walker: self,
            aliases,
            depth: 0,
        };
        match expr.visit(&mut visitor) {
            ControlFlow::Break(err) => Err(err),
            ControlFlow::Continue(()) => Ok(()),
        }
    }

    fn cte_columns(&self, name: &str) -> Option<SourceColumns> {
        self.ctes
            .iter()
            .rev()
            .find(|(cte, _)| cte.eq_ignore_ascii_case(name))
            .map(|(_, columns)| columns.clone())
    }

    fn find_source(&self, alias: &str) -> Option<&Source> {
        self.scopes.iter().rev().find_map(|scope| scope.get(alias))
    }

    /// Qualified replacement for an unqualified column
    ///
    /// `Ok(None)` leaves the reference as written: it names a projection
    /// alias, or a source with unknown columns makes the owner undecidable.
    /// A join column merged by USING / NATURAL reads from every joined side.
    fn resolve_column(
        &self,
        ident: &Ident,
        aliases: &[String],
    ) -> Result<Option<Expr>, QualifyError> {
        let column = ident.value.as_str();
        let is_alias = aliases.iter().any(|a| a.eq_ignore_ascii_case(column));

        for scope in self.scopes.iter().rev() {
            let found: Vec<&Source> = scope
                .sources
                .values()
                .filter(|s| s.columns.contains(column))
                .collect();
            let unknown: Vec<&Source> = scope
                .sources
                .values()
                .filter(|s| s.columns == SourceColumns::Unknown)
                .collect();

            if let Some((_, owners)) = scope.merged.get(&column.to_lowercase()) {
                if found.iter().all(|s| owners.contains(&s.alias)) {
                    return Ok(Some(merged_column(owners, ident)));
                }
            }

            match (found.as_slice(), unknown.as_slice()) {
                ([], []) => continue,
                ([only], []) => return Ok(Some(qualified_column(&only.alias, ident))),
                ([], _) if is_alias => return Ok(None),
                ([], [only]) => return Ok(Some(qualified_column(&only.alias, ident))),
                ([_, _, ..], _) => {
                    return Err(QualifyError::AmbiguousColumn {
                        column: column.to_string(),
                        sources: found.iter().map(|s| s.alias.value.clone()).collect(),
                    })
                }
                _ => return Ok(None),
            }
        }

        if is_alias {
            Ok(None)
        } else {
            Err(QualifyError::UnresolvedColumn {
                column: column.to_string(),
            })
        }
    }
}

/// Qualifies the column references of one expression
///
/// Subqueries met at the top level are handed back to the walker, which
/// qualifies them with the current scopes as their enclosing scopes.
struct ColumnQualifier<'w, 'q, 'a> {
    walker: &'w mut ScopeWalker<'q, 'a>,
    aliases: &'w [String],
    depth: usize,
}

impl VisitorMut for ColumnQualifier<'_, '_, '_> {
    type Break = QualifyError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            if let Err(err) = self.walker.qualify_query(query) {
                return ControlFlow::Break(err);
            }
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }
        match expr {
            Expr::Identifier(ident) => match self.walker.resolve_column(ident, self.aliases) {
                Ok(Some(qualified)) => *expr = qualified,
                Ok(None) => {}
                Err(err) => return ControlFlow::Break(err),
            },
            // schema.table.column -> table.column
            Expr::CompoundIdentifier(idents) if idents.len() > 2 => {
                let table = &idents[idents.len() - 2];
                if let Some(source) = self.walker.find_source(&table.value) {
                    let alias = source.alias.clone();
                    if let Some(column) = idents.last().cloned() {
                        *expr = Expr::CompoundIdentifier(vec![alias, column]);
                    }
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Replace `*` / `alias.*` projection items with the source columns
fn expand_wildcards(select: &mut Select, scope: &Scope) {
    let has_wildcard = select.projection.iter().any(|item| {
        matches!(
            item,
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..)
        )
    });
    if !has_wildcard {
        return;
    }

    let column_item = |(alias, column): (Ident, String)| {
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(vec![alias, Ident::new(column)]))
    };

    let mut expanded = Vec::with_capacity(select.projection.len());
    for item in std::mem::take(&mut select.projection) {
        match &item {
            // Merged join columns come first and only once
            SelectItem::Wildcard(_) => match scope.all_columns() {
                Some(columns) => {
                    expanded.extend(scope.merged.values().map(|(column, owners)| {
                        SelectItem::ExprWithAlias {
                            expr: merged_column(owners, column),
                            alias: column.clone(),
                        }
                    }));
                    expanded.extend(
                        columns
                            .into_iter()
                            .filter(|(alias, column)| {
                                !scope
                                    .merged
                                    .get(&column.to_lowercase())
                                    .is_some_and(|(_, owners)| owners.contains(alias))
                            })
                            .map(column_item),
                    );
                }
                None => expanded.push(item),
            },
            SelectItem::QualifiedWildcard(name, _) => {
                let source = name.0.last().and_then(|alias| scope.get(&alias.value));
                match source {
                    Some(Source {
                        alias,
                        columns: SourceColumns::Known(columns),
                    }) => expanded.extend(
                        columns
                            .iter()
                            .map(|c| column_item((alias.clone(), c.clone()))),
                    ),
                    _ => expanded.push(item),
                }
            }
            _ => expanded.push(item),
        }
    }
    select.projection = expanded;
}

fn qualified_column(alias: &Ident, column: &Ident) -> Expr {
    Expr::CompoundIdentifier(vec![alias.clone(), column.clone()])
}

/// `COALESCE(a.col, b.col, ...)` over the sources of a merged join column
fn merged_column(owners: &[Ident], column: &Ident) -> Expr {
    if let [only] = owners {
        return qualified_column(only, column);
    }
    let args = owners
        .iter()
        .map(|alias| FunctionArg::Unnamed(FunctionArgExpr::Expr(qualified_column(alias, column))))
        .collect();
    Expr::Function(Function {
        name: ObjectName(vec![Ident::new("COALESCE")]),
        uses_odbc_syntax: false,
        parameters: FunctionArguments::None,
        args: FunctionArguments::List(FunctionArgumentList {
            duplicate_treatment: None,
            args,
            clauses: Vec::new(),
        }),
        filter: None,
        null_treatment: None,
        over: None,
        within_group: Vec::new(),
    })
}

fn join_constraint(operator: &mut JoinOperator) -> Option<&mut JoinConstraint> {
    use JoinOperator::*;

    match operator {
        Inner(c) | LeftOuter(c) | RightOuter(c) | FullOuter(c) | LeftSemi(c) | RightSemi(c)
        | LeftAnti(c) | RightAnti(c) | Semi(c) | Anti(c) => Some(c),
        AsOf { constraint, .. } => Some(constraint),
        CrossJoin | CrossApply | OuterApply => None,
    }
}
