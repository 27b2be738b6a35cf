//! gplineage-core: column-level lineage for Greenplum SQL scripts
//!
//! This library derives, for every `CREATE TABLE ... AS SELECT` statement of a
//! script, the base-table columns each output column is computed from and the
//! base tables the output table depends on. It works from a static schema
//! mapping and never connects to a database.

pub mod analyzer;
pub mod dialect;
pub mod error;
pub mod lineage;
pub mod report;
pub mod schema;

pub use analyzer::{Analyzer, AnalyzerOptions};
pub use dialect::{DialectRegistry, DistributedBy, ScriptParser, ScriptStatement, SqlDialect};
pub use error::{AnalysisError, DialectError, GraphError, QualifyError, TraceError};
pub use report::{ColumnLineage, LineageReport, TableLineage};
pub use schema::{Catalog, CatalogBuilder, TableDef, TableFqn, TableReference};
