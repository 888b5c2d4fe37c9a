//! Audit ledger of steps applied by the runner.
//!
//! One row per step name. Built-in steps decide skips by inspecting the
//! schema; the ledger is authoritative only for SQL file steps, whose
//! effects cannot be inspected generically.

use crate::conn::StepConn;
use crate::error::StepError;
use crate::ident::{Ident, placeholder};
use crate::inspector::SchemaInspector;
use sea_orm::{DatabaseBackend, DbErr, QueryResult};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_HISTORY_TABLE: &str = "zonochat_migration_history";

/// A recorded application of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub name: String,
    pub checksum: Option<String>,
    /// RFC 3339 timestamp (UTC).
    pub applied_at: String,
    pub rows_affected: u64,
    pub duration_ms: u64,
}

/// Ledger contents keyed by step name.
pub type HistoryIndex = HashMap<String, HistoryEntry>;

#[derive(Debug, Clone)]
pub struct HistoryLedger {
    table: Ident,
}

impl HistoryLedger {
    #[must_use]
    pub fn new(table: Ident) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &Ident {
        &self.table
    }

    /// Create the ledger table if it does not exist.
    ///
    /// # Errors
    /// Returns the database error if the DDL fails.
    pub async fn ensure(&self, conn: StepConn<'_>) -> Result<(), DbErr> {
        let backend = conn.backend();
        let table = self.table.quoted(backend);
        let sql = match backend {
            DatabaseBackend::Postgres | DatabaseBackend::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    name VARCHAR(255) PRIMARY KEY,
                    checksum VARCHAR(64) NULL,
                    applied_at VARCHAR(64) NOT NULL,
                    rows_affected BIGINT NOT NULL,
                    duration_ms BIGINT NOT NULL
                )"
            ),
            DatabaseBackend::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    name TEXT PRIMARY KEY,
                    checksum TEXT NULL,
                    applied_at TEXT NOT NULL,
                    rows_affected INTEGER NOT NULL,
                    duration_ms INTEGER NOT NULL
                )"
            ),
        };
        conn.execute_unprepared(&sql)
            .await
            .map(|_| ())
            .map_err(into_db_err)
    }

    /// Whether the ledger table exists. Used by read-only planning, which
    /// must not create it.
    ///
    /// # Errors
    /// Returns the database error if the metadata query fails.
    pub async fn exists(&self, conn: StepConn<'_>) -> Result<bool, DbErr> {
        SchemaInspector::new(conn)
            .table_exists(&self.table)
            .await
            .map_err(into_db_err)
    }

    /// Load every recorded entry.
    ///
    /// # Errors
    /// Returns the database error if the query fails or a row cannot be decoded.
    pub async fn load(&self, conn: StepConn<'_>) -> Result<HistoryIndex, DbErr> {
        let sql = format!(
            "SELECT name, checksum, applied_at, rows_affected, duration_ms FROM {}",
            self.table.quoted(conn.backend())
        );
        let rows = conn
            .query_all(conn.statement(&sql, []))
            .await
            .map_err(into_db_err)?;

        let mut index = HistoryIndex::with_capacity(rows.len());
        for row in rows {
            let entry = decode_entry(&row)?;
            index.insert(entry.name.clone(), entry);
        }
        Ok(index)
    }

    /// Record `entry`, replacing any previous row for the same step.
    ///
    /// # Errors
    /// Returns `StepError` if either statement fails.
    pub async fn record(&self, conn: StepConn<'_>, entry: &HistoryEntry) -> Result<(), StepError> {
        let backend = conn.backend();
        let table = self.table.quoted(backend);
        let p = |n| placeholder(backend, n);

        let delete = format!("DELETE FROM {table} WHERE name = {}", p(1));
        conn.execute(conn.statement(&delete, [entry.name.as_str().into()]))
            .await?;

        let insert = format!(
            "INSERT INTO {table} (name, checksum, applied_at, rows_affected, duration_ms) \
             VALUES ({}, {}, {}, {}, {})",
            p(1),
            p(2),
            p(3),
            p(4),
            p(5)
        );
        conn.execute(conn.statement(
            &insert,
            [
                entry.name.as_str().into(),
                entry.checksum.clone().into(),
                entry.applied_at.as_str().into(),
                to_db_int(entry.rows_affected).into(),
                to_db_int(entry.duration_ms).into(),
            ],
        ))
        .await?;
        Ok(())
    }
}

fn decode_entry(row: &QueryResult) -> Result<HistoryEntry, DbErr> {
    let rows_affected: i64 = row.try_get_by_index(3)?;
    let duration_ms: i64 = row.try_get_by_index(4)?;
    Ok(HistoryEntry {
        name: row.try_get_by_index(0)?,
        checksum: row.try_get_by_index(1)?,
        applied_at: row.try_get_by_index(2)?,
        rows_affected: u64::try_from(rows_affected).unwrap_or_default(),
        duration_ms: u64::try_from(duration_ms).unwrap_or_default(),
    })
}

fn to_db_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn into_db_err(err: StepError) -> DbErr {
    match err {
        StepError::Connectivity { source } | StepError::Apply { source, .. } => source,
        other => DbErr::Custom(other.to_string()),
    }
}
