//! Read-only schema and data lookups used to decide whether a change is
//! already in place.
//!
//! Every lookup propagates database errors. A connectivity failure is never
//! reported as "absent".

use crate::conn::StepConn;
use crate::error::StepError;
use crate::ident::{Ident, placeholder};
use sea_orm::{DatabaseBackend, DbErr, QueryResult, Value};

/// Metadata queries against the current schema (`current_schema()` on
/// `PostgreSQL`, `DATABASE()` on `MySQL`, the main database on `SQLite`).
#[derive(Debug, Clone, Copy)]
pub struct SchemaInspector<'a> {
    conn: StepConn<'a>,
}

impl<'a> SchemaInspector<'a> {
    #[must_use]
    pub fn new(conn: StepConn<'a>) -> Self {
        Self { conn }
    }

    /// # Errors
    /// Returns `StepError::Connectivity` or `StepError::Apply` if the metadata
    /// query fails.
    pub async fn table_exists(&self, table: &Ident) -> Result<bool, StepError> {
        let sql = match self.conn.backend() {
            DatabaseBackend::Sqlite => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?"
            }
            DatabaseBackend::Postgres => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
            DatabaseBackend::MySql => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
        };
        let count = self.count(sql, [table.as_str().into()]).await?;
        Ok(count > 0)
    }

    /// # Errors
    /// Returns `StepError::Connectivity` or `StepError::Apply` if the metadata
    /// query fails.
    pub async fn column_exists(&self, table: &Ident, column: &Ident) -> Result<bool, StepError> {
        let sql = match self.conn.backend() {
            DatabaseBackend::Sqlite => "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
            DatabaseBackend::Postgres => {
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2"
            }
            DatabaseBackend::MySql => {
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?"
            }
        };
        let count = self
            .count(sql, [table.as_str().into(), column.as_str().into()])
            .await?;
        Ok(count > 0)
    }

    /// Number of rows whose `column` is NULL.
    ///
    /// # Errors
    /// Returns `StepError::Connectivity` or `StepError::Apply` if the query fails.
    pub async fn count_null(&self, table: &Ident, column: &Ident) -> Result<u64, StepError> {
        let backend = self.conn.backend();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
            table.quoted(backend),
            column.quoted(backend)
        );
        self.count(&sql, []).await
    }

    /// Whether a row matching every `(column, value)` filter exists.
    ///
    /// # Errors
    /// Returns `StepError::Connectivity` or `StepError::Apply` if the query fails.
    pub async fn row_exists(
        &self,
        table: &Ident,
        filters: &[(Ident, Value)],
    ) -> Result<bool, StepError> {
        let backend = self.conn.backend();
        let predicate = if filters.is_empty() {
            "1 = 1".to_owned()
        } else {
            filters
                .iter()
                .enumerate()
                .map(|(i, (col, _))| {
                    format!("{} = {}", col.quoted(backend), placeholder(backend, i + 1))
                })
                .collect::<Vec<_>>()
                .join(" AND ")
        };
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {predicate}",
            table.quoted(backend)
        );
        let count = self
            .count(&sql, filters.iter().map(|(_, v)| v.clone()))
            .await?;
        Ok(count > 0)
    }

    async fn count<I>(&self, sql: &str, values: I) -> Result<u64, StepError>
    where
        I: IntoIterator<Item = Value>,
    {
        let row = self.conn.query_one(self.conn.statement(sql, values)).await?;
        match row {
            Some(row) => read_count(&row).map_err(|e| StepError::from_db(e, Some(sql))),
            None => Ok(0),
        }
    }
}

/// `COUNT(*)` comes back as a signed 64-bit integer on every backend.
fn read_count(row: &QueryResult) -> Result<u64, DbErr> {
    let n: i64 = row.try_get_by_index(0)?;
    Ok(u64::try_from(n).unwrap_or_default())
}
