//! Splits a SQL script into individual statements.
//!
//! Tokenizing follows the engine's dialect, so quoting matches what the
//! server sees: doubled quotes everywhere, backslash escapes only on `MySQL`,
//! `$tag$` bodies on `PostgreSQL`. Comments between statements are dropped.

use sea_orm::DatabaseBackend;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer, TokenizerError};

/// One statement from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    /// Statement text as written, without the terminating `;`.
    pub text: String,
    /// 1-based line where the statement starts.
    pub line: usize,
}

/// Parser dialect for a database backend.
#[must_use]
pub fn dialect_for(backend: DatabaseBackend) -> &'static dyn Dialect {
    match backend {
        DatabaseBackend::Postgres => &PostgreSqlDialect {},
        DatabaseBackend::MySql => &MySqlDialect {},
        DatabaseBackend::Sqlite => &SQLiteDialect {},
    }
}

/// Split `script` on top-level `;`.
///
/// # Errors
/// Returns the tokenizer error for an unterminated literal, identifier or
/// comment.
pub fn split_statements(
    script: &str,
    backend: DatabaseBackend,
) -> Result<Vec<SqlStatement>, TokenizerError> {
    let tokens = Tokenizer::new(dialect_for(backend), script).tokenize_with_location()?;
    let lines = LineIndex::new(script);
    let mut out = Vec::new();
    let mut bounds: Option<(&TokenWithSpan, &TokenWithSpan)> = None;

    for tok in &tokens {
        match &tok.token {
            Token::SemiColon | Token::EOF => {
                if let Some((first, last)) = bounds.take() {
                    out.push(lines.statement(script, first, last));
                }
            }
            Token::Whitespace(_) => {}
            _ => {
                bounds = Some(bounds.map_or((tok, tok), |(first, _)| (first, tok)));
            }
        }
    }
    if let Some((first, last)) = bounds {
        out.push(lines.statement(script, first, last));
    }
    Ok(out)
}

/// Byte offsets of line starts, for mapping token locations back to text.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn statement(&self, src: &str, first: &TokenWithSpan, last: &TokenWithSpan) -> SqlStatement {
        let start = self.offset(src, first.span.start);
        let end = self.offset(src, last.span.end).max(start);
        SqlStatement {
            text: src[start..end].trim().to_owned(),
            line: to_usize(first.span.start.line),
        }
    }

    /// Locations are 1-based lines and 1-based character columns.
    fn offset(&self, src: &str, loc: Location) -> usize {
        let line = to_usize(loc.line).saturating_sub(1);
        let Some(&start) = self.starts.get(line) else {
            return src.len();
        };
        let column = to_usize(loc.column).saturating_sub(1);
        src[start..]
            .char_indices()
            .nth(column)
            .map_or(src.len(), |(i, _)| start + i)
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}
