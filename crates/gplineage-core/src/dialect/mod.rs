//! SQL dialect support
//!
//! Greenplum is PostgreSQL plus a handful of table clauses. The only one the
//! lineage engine needs is `DISTRIBUTED BY (...)` / `DISTRIBUTED RANDOMLY`,
//! which closes most Greenplum `CREATE TABLE` statements; see
//! [`DistributedBy`] and [`ScriptParser`].

mod distributed;
mod parser;

use indexmap::IndexMap;
use sqlparser::dialect::{Dialect, PostgreSqlDialect};
use std::str::FromStr;

use crate::error::DialectError;

pub use distributed::{DistributedBy, DistributionKind};
pub use parser::{generate, ScriptParser, ScriptStatement};

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    Greenplum,
    PostgreSQL,
}

impl SqlDialect {
    /// Get the sqlparser dialect used for the base grammar
    pub fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Greenplum | SqlDialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
        }
    }

    /// Whether `CREATE` statements may end with a `DISTRIBUTED` clause
    pub fn supports_distribution(&self) -> bool {
        matches!(self, SqlDialect::Greenplum)
    }
}

impl FromStr for SqlDialect {
    type Err = DialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DialectRegistry::default().resolve(s)
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::Greenplum => write!(f, "greenplum"),
            SqlDialect::PostgreSQL => write!(f, "postgresql"),
        }
    }
}

/// Name -> dialect lookup owned by the caller
///
/// Replaces process-wide dialect registration: callers build a registry,
/// optionally register extra aliases, and pass the resolved [`SqlDialect`]
/// on to the analyzer.
#[derive(Debug, Clone)]
pub struct DialectRegistry {
    dialects: IndexMap<String, SqlDialect>,
}

impl Default for DialectRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("greenplum", SqlDialect::Greenplum);
        registry.register("gp", SqlDialect::Greenplum);
        registry.register("postgresql", SqlDialect::PostgreSQL);
        registry.register("postgres", SqlDialect::PostgreSQL);
        registry.register("pg", SqlDialect::PostgreSQL);
        registry
    }
}

impl DialectRegistry {
    pub fn empty() -> Self {
        Self {
            dialects: IndexMap::new(),
        }
    }

    /// Register a name (case-insensitive) for a dialect
    pub fn register(&mut self, name: &str, dialect: SqlDialect) -> &mut Self {
        self.dialects.insert(name.to_lowercase(), dialect);
        self
    }

    pub fn get(&self, name: &str) -> Option<SqlDialect> {
        self.dialects.get(&name.to_lowercase()).copied()
    }

    /// Resolve a name, failing with the list of registered names
    pub fn resolve(&self, name: &str) -> Result<SqlDialect, DialectError> {
        self.get(name).ok_or_else(|| DialectError::UnknownDialect {
            name: name.to_string(),
            supported: self.names().join(", "),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.dialects.keys().map(|s| s.as_str()).collect()
    }
}
