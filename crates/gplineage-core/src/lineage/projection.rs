//! Output naming of select lists

use sqlparser::ast::{Expr, Ident, Query, Select, SelectItem, SetExpr};

/// Name a projection expression would be known by without an alias
///
/// Column references keep their column name, function calls their function
/// name, casts and parentheses the name of what they wrap.
pub(crate) fn expr_output_name(expr: &Expr) -> Option<Ident> {
    match expr {
        Expr::Identifier(ident) => Some(ident.clone()),
        Expr::CompoundIdentifier(idents) => idents.last().cloned(),
        Expr::Function(func) => func.name.0.last().cloned(),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => expr_output_name(expr),
        _ => None,
    }
}

/// Output name of the select item at `index`; `None` for wildcards
pub(crate) fn item_output_name(item: &SelectItem, index: usize) -> Option<String> {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.clone()),
        SelectItem::UnnamedExpr(expr) => Some(
            expr_output_name(expr)
                .map(|ident| ident.value)
                .unwrap_or_else(|| synthetic_name(index)),
        ),
        SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => None,
    }
}

pub(crate) fn synthetic_name(index: usize) -> String {
    format!("_col_{}", index)
}

/// Left-most `SELECT` of a set expression
pub(crate) fn leftmost_select(set_expr: &SetExpr) -> Option<&Select> {
    match set_expr {
        SetExpr::Select(select) => Some(select),
        SetExpr::Query(query) => leftmost_select(&query.body),
        SetExpr::SetOperation { left, .. } => leftmost_select(left),
        _ => None,
    }
}

/// Positional output names of a set expression (left-most branch)
pub(crate) fn positional_names(set_expr: &SetExpr) -> Vec<Option<String>> {
    leftmost_select(set_expr)
        .map(|select| {
            select
                .projection
                .iter()
                .enumerate()
                .map(|(i, item)| item_output_name(item, i))
                .collect()
        })
        .unwrap_or_default()
}

/// Known output column names of a set expression
pub(crate) fn output_names(set_expr: &SetExpr) -> Vec<String> {
    positional_names(set_expr).into_iter().flatten().collect()
}

/// Output names of a query, or `None` while a wildcard is still unexpanded
pub(crate) fn known_output_names(query: &Query) -> Option<Vec<String>> {
    positional_names(&query.body).into_iter().collect()
}

/// Strip redundant parentheses around a query
pub(crate) fn unwrap_parenthesized(mut query: Query) -> Query {
    loop {
        let plain = query.with.is_none()
            && query.order_by.is_none()
            && query.limit.is_none()
            && query.offset.is_none();
        let inner = match query.body.as_ref() {
            SetExpr::Query(inner) if plain => inner.as_ref().clone(),
            _ => return query,
        };
        query = inner;
    }
}
