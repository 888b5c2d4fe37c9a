//! The connection a step runs on: the pool directly, or an open transaction.

use crate::error::StepError;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, QueryResult,
    Statement, Value,
};

/// Borrowed connection handed to steps.
#[derive(Clone, Copy)]
pub enum StepConn<'a> {
    Direct(&'a DatabaseConnection),
    Tx(&'a DatabaseTransaction),
}

impl StepConn<'_> {
    #[must_use]
    pub fn backend(&self) -> DatabaseBackend {
        match self {
            Self::Direct(c) => c.get_database_backend(),
            Self::Tx(t) => t.get_database_backend(),
        }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        matches!(self, Self::Tx(_))
    }

    /// Build a statement with bound values for this backend.
    #[must_use]
    pub fn statement<I>(&self, sql: &str, values: I) -> Statement
    where
        I: IntoIterator<Item = Value>,
    {
        Statement::from_sql_and_values(self.backend(), sql, values)
    }

    /// Execute a statement and return the number of affected rows.
    ///
    /// # Errors
    /// Returns `StepError::Apply` carrying the SQL text, or
    /// `StepError::Connectivity` when the database is unreachable.
    pub async fn execute(&self, stmt: Statement) -> Result<u64, StepError> {
        let sql = stmt.sql.clone();
        let res = match self {
            Self::Direct(c) => c.execute(stmt).await,
            Self::Tx(t) => t.execute(stmt).await,
        };
        res.map(|r| r.rows_affected())
            .map_err(|e| StepError::from_db(e, Some(&sql)))
    }

    /// Execute raw SQL without parameters.
    ///
    /// # Errors
    /// Same as [`StepConn::execute`].
    pub async fn execute_unprepared(&self, sql: &str) -> Result<u64, StepError> {
        let res = match self {
            Self::Direct(c) => c.execute_unprepared(sql).await,
            Self::Tx(t) => t.execute_unprepared(sql).await,
        };
        res.map(|r| r.rows_affected())
            .map_err(|e| StepError::from_db(e, Some(sql)))
    }

    /// # Errors
    /// Same as [`StepConn::execute`].
    pub async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, StepError> {
        let sql = stmt.sql.clone();
        let res = match self {
            Self::Direct(c) => c.query_one(stmt).await,
            Self::Tx(t) => t.query_one(stmt).await,
        };
        res.map_err(|e| StepError::from_db(e, Some(&sql)))
    }

    /// # Errors
    /// Same as [`StepConn::execute`].
    pub async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, StepError> {
        let sql = stmt.sql.clone();
        let res = match self {
            Self::Direct(c) => c.query_all(stmt).await,
            Self::Tx(t) => t.query_all(stmt).await,
        };
        res.map_err(|e| StepError::from_db(e, Some(&sql)))
    }
}

impl std::fmt::Debug for StepConn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepConn")
            .field("backend", &self.backend())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
