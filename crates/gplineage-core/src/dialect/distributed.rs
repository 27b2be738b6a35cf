//! Greenplum `DISTRIBUTED` table clause

use sqlparser::ast::{Ident, OrderByExpr};
use sqlparser::dialect::Dialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{IsOptional, Parser};
use sqlparser::tokenizer::Token;

use crate::error::DialectError;

/// Distribution policy of a Greenplum table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionKind {
    By,
    Randomly,
}

/// `DISTRIBUTED BY (...)` / `DISTRIBUTED RANDOMLY` property node
///
/// Emitted after the rest of the `CREATE TABLE` text, never interleaved with
/// the statement's other table options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistributedBy {
    pub kind: DistributionKind,
    /// Distribution key, only for [`DistributionKind::By`]
    pub columns: Option<Vec<Ident>>,
    pub order: Option<Vec<OrderByExpr>>,
}

impl DistributedBy {
    pub fn by(columns: Vec<Ident>) -> Self {
        Self {
            kind: DistributionKind::By,
            columns: Some(columns),
            order: None,
        }
    }

    pub fn randomly() -> Self {
        Self {
            kind: DistributionKind::Randomly,
            columns: None,
            order: None,
        }
    }

    /// Parse the clause from the tokens following the `DISTRIBUTED` keyword
    pub(crate) fn parse_tokens(
        dialect: &dyn Dialect,
        tokens: Vec<Token>,
    ) -> Result<Self, DialectError> {
        let mut parser = Parser::new(dialect).with_tokens(tokens);

        let mut clause = if parser.parse_keyword(Keyword::BY) {
            Self::by(parser.parse_parenthesized_column_list(IsOptional::Mandatory, false)?)
        } else if parse_word(&mut parser, "RANDOMLY") {
            Self::randomly()
        } else {
            return Err(DialectError::InvalidDistribution {
                found: parser.peek_token().token.to_string(),
            });
        };

        if parser.parse_keywords(&[Keyword::ORDER, Keyword::BY]) {
            clause.order = Some(parser.parse_comma_separated(Parser::parse_order_by_expr)?);
        }

        let next = parser.peek_token().token;
        if next != Token::EOF {
            return Err(DialectError::TrailingTokens {
                found: next.to_string(),
            });
        }

        Ok(clause)
    }
}

/// Consume a non-reserved word that sqlparser has no keyword for
fn parse_word(parser: &mut Parser, expected: &str) -> bool {
    match parser.peek_token().token {
        Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(expected) => {
            parser.next_token();
            true
        }
        _ => false,
    }
}

impl std::fmt::Display for DistributedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            DistributionKind::Randomly => write!(f, "DISTRIBUTED RANDOMLY")?,
            DistributionKind::By => {
                let columns = self.columns.as_deref().unwrap_or_default();
                write!(f, "DISTRIBUTED BY ({})", join(columns))?;
            }
        }
        if let Some(order) = &self.order {
            write!(f, " ORDER BY {}", join(order))?;
        }
        Ok(())
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::tokenizer::Tokenizer;

    fn parse(clause: &str) -> Result<DistributedBy, DialectError> {
        let dialect = PostgreSqlDialect {};
        let tokens = Tokenizer::new(&dialect, clause).tokenize().unwrap();
        DistributedBy::parse_tokens(&dialect, tokens)
    }

    #[test]
    fn test_parse_by_columns() {
        let clause = parse("BY (id, sale_date)").unwrap();
        assert_eq!(clause.kind, DistributionKind::By);
        let columns: Vec<_> = clause
            .columns
            .unwrap()
            .into_iter()
            .map(|c| c.value)
            .collect();
        assert_eq!(columns, vec!["id", "sale_date"]);
        assert!(clause.order.is_none());
    }

    #[test]
    fn test_parse_randomly() {
        let clause = parse("RANDOMLY").unwrap();
        assert_eq!(clause, DistributedBy::randomly());
    }

    #[test]
    fn test_parse_trailing_order() {
        let clause = parse("RANDOMLY ORDER BY ts DESC").unwrap();
        assert_eq!(clause.to_string(), "DISTRIBUTED RANDOMLY ORDER BY ts DESC");
    }

    #[test]
    fn test_missing_alternative_is_a_syntax_error() {
        let err = parse("EVENLY").unwrap_err();
        assert!(matches!(err, DialectError::InvalidDistribution { .. }));
        assert!(err.to_string().contains("BY or RANDOMLY"));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse("BY (id) extra").unwrap_err();
        assert!(matches!(err, DialectError::TrailingTokens { .. }));
    }

    #[test]
    fn test_display() {
        let clause = DistributedBy::by(vec![Ident::new("id"), Ident::new("sale_date")]);
        assert_eq!(clause.to_string(), "DISTRIBUTED BY (id, sale_date)");
        assert_eq!(DistributedBy::randomly().to_string(), "DISTRIBUTED RANDOMLY");
    }
}
