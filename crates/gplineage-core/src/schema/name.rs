//! Table names: references as written in SQL and resolved FQNs

use serde::{Deserialize, Serialize};
use sqlparser::ast::ObjectName;

/// Table reference as it appears in a query (catalog.schema.table or shorter)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableReference {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TableReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn with_catalog(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            catalog: Some(catalog.into()),
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Build from a parsed object name, keeping at most the last three parts
    pub fn from_object_name(name: &ObjectName) -> Self {
        match name.0.as_slice() {
            [table] => Self::new(&table.value),
            [schema, table] => Self::with_schema(&schema.value, &table.value),
            [.., catalog, schema, table] => {
                Self::with_catalog(&catalog.value, &schema.value, &table.value)
            }
            [] => Self::new(name.to_string()),
        }
    }

    /// True when only the bare table name was written
    pub fn is_bare(&self) -> bool {
        self.catalog.is_none() && self.schema.is_none()
    }
}

impl std::fmt::Display for TableReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{}.", catalog)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        write!(f, "{}", self.name)
    }
}

/// Fully-qualified table name with variable arity
///
/// Parts that could not be resolved are simply absent: `db.s.t`, `s.t`,
/// `db.t` and `t` are all valid FQNs. No padding is performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct TableFqn(Vec<String>);

impl TableFqn {
    /// Resolve a reference, filling missing parts from the defaults
    pub fn resolve(
        reference: &TableReference,
        default_catalog: Option<&str>,
        default_schema: Option<&str>,
    ) -> Self {
        let catalog = reference.catalog.as_deref().or(default_catalog);
        let schema = reference.schema.as_deref().or(default_schema);
        let parts = [catalog, schema, Some(reference.name.as_str())]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        Self(parts)
    }

    /// Resolve a parsed object name, filling missing parts from the defaults
    pub fn from_object_name(
        name: &ObjectName,
        default_catalog: Option<&str>,
        default_schema: Option<&str>,
    ) -> Self {
        Self::resolve(
            &TableReference::from_object_name(name),
            default_catalog,
            default_schema,
        )
    }

    /// `FQN.column` string used in lineage lists
    pub fn column(&self, column: &str) -> String {
        format!("{}.{}", self, column)
    }

    /// Arity-tolerant, case-insensitive comparison
    ///
    /// `s.t` matches `db.s.t`, but `a.t` does not match `b.t`.
    pub fn matches(&self, other: &TableFqn) -> bool {
        self.0
            .iter()
            .rev()
            .zip(other.0.iter().rev())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl std::fmt::Display for TableFqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<TableFqn> for String {
    fn from(fqn: TableFqn) -> Self {
        fqn.to_string()
    }
}

impl From<String> for TableFqn {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl TableFqn {
    /// Parse from a dotted name like "db.schema.table"
    pub fn parse(s: &str) -> Self {
        Self(s.split('.').map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_fills_defaults() {
        let fqn = TableFqn::resolve(&TableReference::new("t"), Some("db"), Some("s"));
        assert_eq!(fqn.to_string(), "db.s.t");

        let fqn = TableFqn::resolve(&TableReference::with_schema("x", "t"), Some("db"), None);
        assert_eq!(fqn.to_string(), "db.x.t");
    }

    #[test]
    fn test_resolve_keeps_variable_arity() {
        // No schema default: the catalog is still attached
        let fqn = TableFqn::resolve(&TableReference::new("t"), Some("db"), None);
        assert_eq!(fqn, TableFqn::parse("db.t"));

        let fqn = TableFqn::resolve(&TableReference::new("t"), None, None);
        assert_eq!(fqn.to_string(), "t");
    }

    #[test]
    fn test_matches_is_arity_tolerant() {
        let full = TableFqn::parse("DB.Sales.Orders");
        assert!(full.matches(&TableFqn::parse("sales.orders")));
        assert!(TableFqn::parse("orders").matches(&full));
        assert!(!full.matches(&TableFqn::parse("other.orders")));
    }

    #[test]
    fn test_column_string() {
        let fqn = TableFqn::parse("db.s.base");
        assert_eq!(fqn.column("a"), "db.s.base.a");
    }
}
