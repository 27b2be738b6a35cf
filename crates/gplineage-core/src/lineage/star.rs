//! Star expansion of `alias.*` function arguments
//!
//! `row_to_json(c.*)` hides which columns feed the call. Before
//! qualification, every `alias.*` argument is rewritten into a tuple of
//! `alias.column` references so the columns become visible to lineage.

use indexmap::IndexMap;
use sqlparser::ast::{
    visit_expressions_mut, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, Query,
    TableFactor, Visit, Visitor,
};
use std::collections::HashMap;
use std::ops::ControlFlow;
use tracing::debug;

use super::projection::known_output_names;
use crate::schema::{Catalog, TableReference};

/// Output columns of every CTE declared anywhere in a query, by name
///
/// CTEs whose select list still holds a wildcard are left out.
pub fn cte_output_columns(query: &Query) -> IndexMap<String, Vec<String>> {
    struct CteCollector(IndexMap<String, Vec<String>>);

    impl Visitor for CteCollector {
        type Break = ();

        fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
            for cte in query.with.iter().flat_map(|w| &w.cte_tables) {
                let columns = if cte.alias.columns.is_empty() {
                    known_output_names(&cte.query)
                } else {
                    Some(cte.alias.columns.iter().map(|c| c.name.value.clone()).collect())
                };
                if let Some(columns) = columns {
                    self.0.insert(cte.alias.name.value.to_lowercase(), columns);
                }
            }
            ControlFlow::Continue(())
        }
    }

    let mut collector = CteCollector(IndexMap::new());
    let _ = query.visit(&mut collector);
    collector.0
}

/// Rewrites `alias.*` function arguments into explicit column tuples
pub struct StarExpander<'a> {
    catalog: &'a Catalog,
    default_catalog: Option<&'a str>,
    default_schema: Option<&'a str>,
}

impl<'a> StarExpander<'a> {
    pub fn new(
        catalog: &'a Catalog,
        default_catalog: Option<&'a str>,
        default_schema: Option<&'a str>,
    ) -> Self {
        Self {
            catalog,
            default_catalog,
            default_schema,
        }
    }

    /// Expand in place; arguments whose columns are unknown stay untouched
    pub fn expand(&self, query: &mut Query, cte_columns: &IndexMap<String, Vec<String>>) {
        let sources = self.collect_sources(query, cte_columns);

        let _ = visit_expressions_mut(query, |expr| {
            if let Expr::Function(func) = expr {
                if let FunctionArguments::List(list) = &mut func.args {
                    for arg in &mut list.args {
                        expand_argument(arg, &sources);
                    }
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }

    /// Column sets of every table reference, under alias and base name
    fn collect_sources(
        &self,
        query: &Query,
        cte_columns: &IndexMap<String, Vec<String>>,
    ) -> HashMap<String, Vec<String>> {
        struct SourceCollector<'s, 'a> {
            expander: &'s StarExpander<'a>,
            cte_columns: &'s IndexMap<String, Vec<String>>,
            sources: HashMap<String, Vec<String>>,
        }

        impl Visitor for SourceCollector<'_, '_> {
            type Break = ();

            fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
                if let TableFactor::Table {
                    name, alias, args, ..
                } = factor
                {
                    if args.is_some() {
                        return ControlFlow::Continue(());
                    }
                    let reference = TableReference::from_object_name(name);
                    let base = reference.name.to_lowercase();
                    let columns = match self.cte_columns.get(&base) {
                        Some(columns) if reference.is_bare() => Some(columns.clone()),
                        _ => self
                            .expander
                            .catalog
                            .lookup(
                                &reference,
                                self.expander.default_catalog,
                                self.expander.default_schema,
                            )
                            .map(|table| {
                                table.column_names().into_iter().map(str::to_string).collect()
                            }),
                    };
                    if let Some(columns) = columns {
                        if let Some(alias) = alias {
                            self.sources
                                .insert(alias.name.value.to_lowercase(), columns.clone());
                        }
                        self.sources.insert(base, columns);
                    }
                }
                ControlFlow::Continue(())
            }
        }

        let mut collector = SourceCollector {
            expander: self,
            cte_columns,
            sources: HashMap::new(),
        };
        let _ = query.visit(&mut collector);
        collector.sources
    }
}

fn expand_argument(arg: &mut FunctionArg, sources: &HashMap<String, Vec<String>>) {
    let FunctionArg::Unnamed(FunctionArgExpr::QualifiedWildcard(name)) = arg else {
        return;
    };
    let Some(alias) = name.0.last().cloned() else {
        return;
    };
    let Some(columns) = sources.get(&alias.value.to_lowercase()) else {
        debug!(alias = %alias, "no columns known for star argument");
        return;
    };

    let mut columns = columns.clone();
    columns.sort();
    let tuple = columns
        .into_iter()
        .map(|column| Expr::CompoundIdentifier(vec![alias.clone(), Ident::new(column)]))
        .collect();
    *arg = FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Tuple(tuple)));
}
