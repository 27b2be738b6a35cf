//! Error types
//!
//! Every layer of the engine has its own error enum. The analyzer folds them
//! into [`AnalysisError`], whose `Display` output is what ends up in the
//! `errors` section of a lineage report.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while tokenizing or parsing a script
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum DialectError {
    #[error("{0}")]
    #[diagnostic(code(gplineage::dialect::tokenize))]
    Tokenize(String),

    #[error("{0}")]
    #[diagnostic(code(gplineage::dialect::parse))]
    Parse(String),

    /// `DISTRIBUTED` clause that is neither `BY (...)` nor `RANDOMLY`
    #[error("Expected: BY or RANDOMLY after DISTRIBUTED, found: {found}")]
    #[diagnostic(
        code(gplineage::dialect::distributed),
        help("Use DISTRIBUTED BY (column, ...) or DISTRIBUTED RANDOMLY")
    )]
    InvalidDistribution { found: String },

    #[error("Unexpected token after DISTRIBUTED clause: {found}")]
    #[diagnostic(code(gplineage::dialect::trailing))]
    TrailingTokens { found: String },

    #[error("Unknown dialect: '{name}'. Supported dialects: {supported}.")]
    #[diagnostic(code(gplineage::dialect::unknown))]
    UnknownDialect { name: String, supported: String },
}

impl From<sqlparser::tokenizer::TokenizerError> for DialectError {
    fn from(e: sqlparser::tokenizer::TokenizerError) -> Self {
        DialectError::Tokenize(e.to_string())
    }
}

impl From<sqlparser::parser::ParserError> for DialectError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        DialectError::Parse(e.to_string())
    }
}

/// Errors raised by the qualification pass
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum QualifyError {
    #[error("Column '{column}' is ambiguous (found in tables: {})", .sources.join(", "))]
    #[diagnostic(
        code(gplineage::qualify::ambiguous_column),
        help("Qualify the column with a table name or alias")
    )]
    AmbiguousColumn { column: String, sources: Vec<String> },

    #[error("Column '{column}' could not be resolved")]
    #[diagnostic(
        code(gplineage::qualify::unresolved_column),
        help("Check the column against the schema file")
    )]
    UnresolvedColumn { column: String },
}

/// Errors raised while building a dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum GraphError {
    #[error("Cannot find column '{column}' in query")]
    #[diagnostic(code(gplineage::graph::column_not_found))]
    ColumnNotFound { column: String },

    #[error("Column index {index} out of range")]
    #[diagnostic(code(gplineage::graph::index_out_of_range))]
    IndexOutOfRange { index: usize },

    #[error("query nesting exceeded the maximum depth of {limit}")]
    #[diagnostic(code(gplineage::graph::depth_exceeded))]
    DepthExceeded { limit: usize },
}

/// Errors raised while tracing one column
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum TraceError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(GraphError),

    #[error("lineage recursion exceeded the maximum depth of {limit}")]
    #[diagnostic(
        code(gplineage::trace::depth_exceeded),
        help("Recursive CTEs cannot be traced to base tables")
    )]
    DepthExceeded { limit: usize },
}

impl From<GraphError> for TraceError {
    fn from(e: GraphError) -> Self {
        match e {
            // Reported alike whichever pass hits the limit
            GraphError::DepthExceeded { limit } => TraceError::DepthExceeded { limit },
            other => TraceError::Graph(other),
        }
    }
}

/// Failures at the analyzer boundary
///
/// None of these escape [`crate::Analyzer::analyze`]; they are rendered
/// into the report's `errors` map instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum AnalysisError {
    /// The whole script could not be parsed
    #[error("Failed to parse the entire SQL script: {0}")]
    #[diagnostic(code(gplineage::script_parse))]
    ScriptParse(#[from] DialectError),

    /// Qualification of one target statement failed
    #[error("Could not analyze statement: {0}")]
    #[diagnostic(code(gplineage::statement_analysis))]
    StatementAnalysis(#[from] QualifyError),

    /// Tracing of one output column failed
    #[error("Could not trace column '{column}': {source}")]
    #[diagnostic(code(gplineage::column_trace))]
    ColumnTrace { column: String, source: TraceError },
}

impl AnalysisError {
    /// Short stable code for the error class (e.g., "L0001")
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::ScriptParse(_) => "L0001",
            AnalysisError::StatementAnalysis(_) => "L0002",
            AnalysisError::ColumnTrace { .. } => "L0003",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_messages() {
        let err = AnalysisError::ScriptParse(DialectError::Parse("boom".to_string()));
        assert_eq!(err.to_string(), "Failed to parse the entire SQL script: boom");
        assert_eq!(err.code(), "L0001");

        let err = AnalysisError::ColumnTrace {
            column: "total".to_string(),
            source: TraceError::DepthExceeded { limit: 8 },
        };
        assert_eq!(
            err.to_string(),
            "Could not trace column 'total': lineage recursion exceeded the maximum depth of 8"
        );
    }

    #[test]
    fn test_ambiguous_message_lists_sources() {
        let err = QualifyError::AmbiguousColumn {
            column: "id".to_string(),
            sources: vec!["u".to_string(), "o".to_string()],
        };
        assert_eq!(
            AnalysisError::from(err).to_string(),
            "Could not analyze statement: Column 'id' is ambiguous (found in tables: u, o)"
        );
    }
}
