//! Script parser: PostgreSQL grammar plus the Greenplum `DISTRIBUTED` clause

use sqlparser::ast::Statement;
use sqlparser::dialect::Dialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

use super::{DistributedBy, SqlDialect};
use crate::error::DialectError;

/// A parsed statement together with its Greenplum distribution clause
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptStatement {
    pub statement: Statement,
    pub distribution: Option<DistributedBy>,
}

impl ScriptStatement {
    pub fn new(statement: Statement) -> Self {
        Self {
            statement,
            distribution: None,
        }
    }
}

impl std::fmt::Display for ScriptStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.statement)?;
        if let Some(distribution) = &self.distribution {
            write!(f, " {}", distribution)?;
        }
        Ok(())
    }
}

/// Render statements back to SQL, one terminated statement per line
pub fn generate(statements: &[ScriptStatement]) -> String {
    statements
        .iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parser for whole SQL scripts
///
/// The script is tokenized once and split at top-level semicolons. For
/// dialects with distribution support, a trailing `DISTRIBUTED ...` clause is
/// cut off each `CREATE` statement and parsed separately; the remainder goes
/// through the stock PostgreSQL grammar.
#[derive(Debug, Clone, Copy)]
pub struct ScriptParser {
    dialect: SqlDialect,
    normalize: bool,
}

impl ScriptParser {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            normalize: false,
        }
    }

    /// Fold unquoted identifiers to lower case before parsing
    pub fn normalize_identifiers(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn parse(&self, sql: &str) -> Result<Vec<ScriptStatement>, DialectError> {
        let dialect = self.dialect.parser_dialect();
        let mut tokens = Tokenizer::new(dialect.as_ref(), sql).tokenize()?;

        if self.normalize {
            for token in &mut tokens {
                if let Token::Word(word) = token {
                    if word.quote_style.is_none() {
                        word.value = word.value.to_lowercase();
                    }
                }
            }
        }

        let mut statements = Vec::new();
        for group in split_statements(tokens) {
            self.parse_group(dialect.as_ref(), group, &mut statements)?;
        }
        debug!(count = statements.len(), "parsed script");
        Ok(statements)
    }

    fn parse_group(
        &self,
        dialect: &dyn Dialect,
        group: Vec<Token>,
        out: &mut Vec<ScriptStatement>,
    ) -> Result<(), DialectError> {
        let split_at = if self.dialect.supports_distribution() && is_create(&group) {
            find_distributed(&group)
        } else {
            None
        };

        let Some(index) = split_at else {
            out.extend(parse_plain(dialect, group)?.into_iter().map(ScriptStatement::new));
            return Ok(());
        };

        let clause_tokens = group[index + 1..].to_vec();
        let prefix = group[..index].to_vec();
        match DistributedBy::parse_tokens(dialect, clause_tokens) {
            Ok(distribution) => {
                let mut parsed: Vec<_> = parse_plain(dialect, prefix)?
                    .into_iter()
                    .map(ScriptStatement::new)
                    .collect();
                if let Some(last) = parsed.last_mut() {
                    last.distribution = Some(distribution);
                }
                out.extend(parsed);
                Ok(())
            }
            // `distributed` may just be an identifier in the query body
            Err(clause_err) => match parse_plain(dialect, group) {
                Ok(parsed) => {
                    out.extend(parsed.into_iter().map(ScriptStatement::new));
                    Ok(())
                }
                Err(_) => Err(clause_err),
            },
        }
    }
}

fn parse_plain(dialect: &dyn Dialect, tokens: Vec<Token>) -> Result<Vec<Statement>, DialectError> {
    Ok(Parser::new(dialect).with_tokens(tokens).parse_statements()?)
}

/// Split a token stream at semicolons outside parentheses, dropping groups
/// that hold only whitespace and comments
fn split_statements(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;

    for token in tokens {
        match token {
            Token::SemiColon if depth == 0 => {
                groups.push(std::mem::take(&mut current));
                continue;
            }
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::EOF => continue,
            _ => {}
        }
        current.push(token);
    }
    groups.push(current);

    groups.retain(|group| !group.iter().all(|t| matches!(t, Token::Whitespace(_))));
    groups
}

fn is_create(tokens: &[Token]) -> bool {
    matches!(
        tokens.iter().find(|t| !matches!(t, Token::Whitespace(_))),
        Some(Token::Word(w)) if w.keyword == Keyword::CREATE
    )
}

/// Index of the last unquoted top-level `DISTRIBUTED` word
fn find_distributed(tokens: &[Token]) -> Option<usize> {
    let mut depth = 0usize;
    let mut found = None;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(w)
                if depth == 0
                    && w.quote_style.is_none()
                    && w.value.eq_ignore_ascii_case("DISTRIBUTED") =>
            {
                found = Some(i);
            }
            _ => {}
        }
    }
    found
}
