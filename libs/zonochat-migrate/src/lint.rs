//! Static idempotency checks for versioned SQL files.
//!
//! Each statement is parsed in the target engine's dialect and flagged when
//! it would fail on a second run, for example `CREATE TABLE` without
//! `IF NOT EXISTS`. Findings are advisory: some engines lack the guarded
//! form of a statement (`SQLite` and `MySQL` have no
//! `ADD COLUMN IF NOT EXISTS`).

use crate::error::LoadError;
use crate::sql::{dialect_for, split_statements};
use crate::steps::sql_file::load_sql_dir;
use sea_orm::DatabaseBackend;
use serde::Serialize;
use sqlparser::ast::{AlterTableOperation, ObjectType, Statement};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::TokenizerError;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LintRule {
    CreateTableWithoutIfNotExists,
    CreateIndexWithoutIfNotExists,
    DropWithoutIfExists,
    AddColumnWithoutIfNotExists,
}

impl LintRule {
    #[must_use]
    pub fn suggestion(self) -> &'static str {
        match self {
            Self::CreateTableWithoutIfNotExists => "use CREATE TABLE IF NOT EXISTS",
            Self::CreateIndexWithoutIfNotExists => "use CREATE INDEX IF NOT EXISTS",
            Self::DropWithoutIfExists => "use DROP ... IF EXISTS",
            Self::AddColumnWithoutIfNotExists => {
                "use ADD COLUMN IF NOT EXISTS, or move the change into a guarded built-in step"
            }
        }
    }
}

/// A statement that is not safe to re-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintFinding {
    pub file: String,
    pub line: usize,
    pub rule: LintRule,
    pub statement: String,
}

impl std::fmt::Display for LintFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {}\n  statement: {}",
            self.file,
            self.line,
            self.rule.suggestion(),
            first_line(&self.statement)
        )
    }
}

/// The rule a parsed statement breaks, if any.
fn unguarded(stmt: &Statement) -> Option<LintRule> {
    match stmt {
        Statement::CreateTable(create) if !create.if_not_exists => {
            Some(LintRule::CreateTableWithoutIfNotExists)
        }
        Statement::CreateIndex(index) if !index.if_not_exists => {
            Some(LintRule::CreateIndexWithoutIfNotExists)
        }
        Statement::Drop {
            object_type: ObjectType::Table | ObjectType::Index,
            if_exists: false,
            ..
        } => Some(LintRule::DropWithoutIfExists),
        Statement::AlterTable { operations, .. } => operations
            .iter()
            .any(|op| {
                matches!(
                    op,
                    AlterTableOperation::AddColumn {
                        if_not_exists: false,
                        ..
                    }
                )
            })
            .then_some(LintRule::AddColumnWithoutIfNotExists),
        _ => None,
    }
}

/// Lint one script. `file` is only used to label findings.
///
/// Statements the parser does not understand are skipped with a warning.
///
/// # Errors
/// Returns the tokenizer error when the script cannot be split.
pub fn lint_sql(
    file: &str,
    script: &str,
    backend: DatabaseBackend,
) -> Result<Vec<LintFinding>, TokenizerError> {
    let dialect = dialect_for(backend);
    let mut findings = Vec::new();
    for stmt in split_statements(script, backend)? {
        let parsed = match Parser::parse_sql(dialect, &stmt.text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(file, line = stmt.line, error = %e, "statement not understood, skipping");
                continue;
            }
        };
        if let Some(rule) = parsed.iter().find_map(unguarded) {
            findings.push(LintFinding {
                file: file.to_owned(),
                line: stmt.line,
                rule,
                statement: stmt.text,
            });
        }
    }
    Ok(findings)
}

/// Lint every versioned SQL file in `dir`, in apply order.
///
/// # Errors
/// Returns `LoadError` if the directory cannot be read, a file is misnamed
/// or shares a version, or a script cannot be split into statements.
pub async fn lint_dir(
    dir: &Path,
    backend: DatabaseBackend,
) -> Result<Vec<LintFinding>, LoadError> {
    let mut findings = Vec::new();
    for step in load_sql_dir(dir).await? {
        let path = step.path();
        let label = path.file_name().map_or_else(
            || path.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        let found = lint_sql(&label, step.script(), backend).map_err(|source| {
            LoadError::Tokenize {
                file: label.clone(),
                source,
            }
        })?;
        findings.extend(found);
    }
    Ok(findings)
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn flagged(script: &str, backend: DatabaseBackend) -> Vec<LintRule> {
        lint_sql("001_test.sql", script, backend)
            .unwrap()
            .into_iter()
            .map(|f| f.rule)
            .collect()
    }

    #[test]
    fn guarded_statements_pass() {
        let script = "
            CREATE TABLE IF NOT EXISTS tenants (id INT);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_t ON tenants (id);
            DROP TABLE IF EXISTS legacy;
            ALTER TABLE users ADD COLUMN IF NOT EXISTS tenant_id INT;
            UPDATE users SET tenant_id = 1 WHERE tenant_id IS NULL;
        ";
        assert!(flagged(script, DatabaseBackend::Postgres).is_empty());
    }

    #[test]
    fn unguarded_statements_are_flagged() {
        let script = "
            create table tenants (id int);
            CREATE INDEX idx_t ON tenants (id);
            DROP INDEX idx_old;
            ALTER TABLE contacts
                ADD COLUMN channel VARCHAR(32);
        ";
        assert_eq!(
            flagged(script, DatabaseBackend::Sqlite),
            vec![
                LintRule::CreateTableWithoutIfNotExists,
                LintRule::CreateIndexWithoutIfNotExists,
                LintRule::DropWithoutIfExists,
                LintRule::AddColumnWithoutIfNotExists,
            ]
        );
    }

    #[test]
    fn keywords_inside_literals_are_not_statements() {
        let script = "INSERT INTO notes (body) VALUES ('CREATE TABLE t (id INT)');";
        assert!(flagged(script, DatabaseBackend::Sqlite).is_empty());
    }

    #[test]
    fn statement_after_backslash_literal_is_checked() {
        let script = "INSERT INTO paths VALUES ('C:\\');\nCREATE TABLE x (id INTEGER);\n";
        let findings = lint_sql("003_paths.sql", script, DatabaseBackend::Sqlite).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 2);
        assert_eq!(findings[0].rule, LintRule::CreateTableWithoutIfNotExists);
    }

    #[test]
    fn findings_carry_line_numbers() {
        let findings = lint_sql(
            "007_channels.sql",
            "-- header\n\nCREATE TABLE t (id INT);\n",
            DatabaseBackend::Sqlite,
        )
        .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 3);
        assert!(findings[0].to_string().starts_with("007_channels.sql:3:"));
    }
}
