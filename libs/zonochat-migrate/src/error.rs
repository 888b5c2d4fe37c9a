//! Error types for steps, the runner and SQL file loading.

use sea_orm::{DbErr, RuntimeErr};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single migration step.
///
/// Every variant is caught at the step boundary, turned into a report
/// entry, and halts the remaining sequence.
#[derive(Debug, Error)]
pub enum StepError {
    /// The database could not be reached.
    #[error("database connectivity lost: {source}")]
    Connectivity { source: DbErr },

    /// A required table, column or reference row is missing.
    #[error("precondition failed: {message}")]
    Precondition {
        message: String,
        guidance: Option<String>,
    },

    /// A statement failed to execute.
    #[error("statement failed: {source}")]
    Apply { sql: Option<String>, source: DbErr },

    /// The change is still absent after apply.
    #[error("verification failed: {message}")]
    Verification { message: String },
}

/// Stable, serializable classification of a [`StepError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Precondition,
    Apply,
    Verification,
}

impl StepError {
    /// Classify a database error raised while running `sql`.
    #[must_use]
    pub fn from_db(source: DbErr, sql: Option<&str>) -> Self {
        if is_connectivity(&source) {
            Self::Connectivity { source }
        } else {
            Self::Apply {
                sql: sql.map(str::to_owned),
                source,
            }
        }
    }

    #[must_use]
    pub fn precondition(message: impl Into<String>, guidance: Option<&str>) -> Self {
        Self::Precondition {
            message: message.into(),
            guidance: guidance.map(str::to_owned),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::Apply { .. } => ErrorKind::Apply,
            Self::Verification { .. } => ErrorKind::Verification,
        }
    }

    /// Statement text, when the failure came from a statement.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Apply { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn guidance(&self) -> Option<&str> {
        match self {
            Self::Precondition { guidance, .. } => guidance.as_deref(),
            _ => None,
        }
    }
}

/// True when the error means the server or pool is unreachable rather than
/// that a statement was rejected.
#[must_use]
pub fn is_connectivity(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            matches!(
                e,
                sea_orm::sqlx::Error::Io(_)
                    | sea_orm::sqlx::Error::Tls(_)
                    | sea_orm::sqlx::Error::PoolTimedOut
                    | sea_orm::sqlx::Error::PoolClosed
                    | sea_orm::sqlx::Error::WorkerCrashed
            )
        }
        _ => false,
    }
}

/// Errors that stop a run before any step is attempted.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("duplicate step name '{name}'")]
    DuplicateStepName { name: String },

    #[error("database is unreachable: {source}")]
    Connectivity { source: DbErr },

    #[error("failed to prepare migration history table '{table}': {source}")]
    History { table: String, source: DbErr },
}

impl RunnerError {
    pub(crate) fn from_history(table: &str, source: DbErr) -> Self {
        if is_connectivity(&source) {
            Self::Connectivity { source }
        } else {
            Self::History {
                table: table.to_owned(),
                source,
            }
        }
    }
}

/// Errors while discovering and reading versioned SQL files.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("'{file}' does not follow the NNN_description.sql naming scheme")]
    BadFileName { file: String },

    #[error("'{file}' cannot be split into statements: {source}")]
    Tokenize {
        file: String,
        source: sqlparser::tokenizer::TokenizerError,
    },

    #[error("'{second}' reuses version {version} of '{first}'")]
    DuplicateVersion {
        version: u64,
        first: String,
        second: String,
    },
}

/// Rejected table or column identifier.
#[derive(Debug, Error)]
#[error("invalid identifier '{ident}': {reason}")]
pub struct IdentError {
    pub ident: String,
    pub reason: &'static str,
}
