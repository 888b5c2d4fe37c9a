#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Database access for the `ZonoChat` migrator.
//!
//! A thin handle over a `SeaORM` connection backed by an `SQLx` pool for
//! `SQLite`, `PostgreSQL` or `MySQL`, plus the configuration types that turn
//! host/user/password settings into a connection string.
//!
//! # Features
//! - `pg`, `mysql`, `sqlite`: enable the corresponding backend

#![cfg_attr(
    not(any(feature = "pg", feature = "mysql", feature = "sqlite")),
    allow(unused_imports, unused_variables, dead_code, unreachable_code)
)]

pub mod config;
mod pool_opts;

pub use config::{DbConnConfig, DbEngineCfg, engine_from_dsn, redact_credentials_in_dsn};

use std::time::Duration;

#[cfg(any(feature = "pg", feature = "mysql", feature = "sqlite"))]
use pool_opts::ApplyPoolOpts;

use sea_orm::{DatabaseBackend, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Typed error for the DB handle and configuration helpers.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unknown DSN: {0}")]
    UnknownDsn(String),

    #[error("Feature not enabled: {0}")]
    FeatureDisabled(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration conflict: {0}")]
    ConfigConflict(String),

    #[error("Missing required setting '{field}'")]
    MissingSetting { field: &'static str },

    #[error("Environment variable '{var}' is not available: {source}")]
    EnvVar {
        var: String,
        #[source]
        source: std::env::VarError,
    },

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[cfg(any(feature = "pg", feature = "mysql", feature = "sqlite"))]
    #[error(transparent)]
    Sqlx(#[from] sea_orm::sqlx::Error),

    #[error(transparent)]
    Sea(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    MySql,
    Sqlite,
}

impl DbEngine {
    #[must_use]
    pub fn backend(self) -> DatabaseBackend {
        match self {
            Self::Postgres => DatabaseBackend::Postgres,
            Self::MySql => DatabaseBackend::MySql,
            Self::Sqlite => DatabaseBackend::Sqlite,
        }
    }

    /// Whether DDL statements take part in transactions on this engine.
    ///
    /// `MySQL` commits implicitly around most DDL.
    #[must_use]
    pub fn supports_transactional_ddl(self) -> bool {
        matches!(self, Self::Postgres | Self::Sqlite)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for DbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection options.
/// Each driver applies the subset of pool knobs it supports.
#[derive(Clone, Debug)]
pub struct ConnectOpts {
    /// Maximum number of connections in the pool.
    pub max_conns: Option<u32>,
    /// Minimum number of connections in the pool.
    pub min_conns: Option<u32>,
    /// Timeout to acquire a connection from the pool.
    pub acquire_timeout: Option<Duration>,
    /// Idle timeout before a connection is closed.
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime for a connection.
    pub max_lifetime: Option<Duration>,
    /// Test connection health before acquire.
    pub test_before_acquire: bool,
    /// For `SQLite` file DSNs, create parent directories if missing.
    pub create_sqlite_dirs: bool,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            max_conns: Some(1),
            min_conns: None,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            max_lifetime: None,
            test_before_acquire: false,
            create_sqlite_dirs: true,
        }
    }
}

/// Main handle. Owns the pool for the lifetime of one migrator run.
#[derive(Debug, Clone)]
pub struct DbHandle {
    engine: DbEngine,
    dsn: String,
    conn: DatabaseConnection,
}

impl DbHandle {
    /// Detect engine by DSN.
    ///
    /// # Errors
    /// Returns `DbError::UnknownDsn` if the DSN scheme is not recognized.
    pub fn detect(dsn: &str) -> Result<DbEngine> {
        Ok(match engine_from_dsn(dsn)? {
            DbEngineCfg::Postgres => DbEngine::Postgres,
            DbEngineCfg::Mysql => DbEngine::MySql,
            DbEngineCfg::Sqlite => DbEngine::Sqlite,
        })
    }

    /// Connect and build handle.
    ///
    /// # Errors
    /// Returns an error if the DSN is invalid, the backend feature is disabled,
    /// or the connection cannot be established.
    pub async fn connect(dsn: &str, opts: ConnectOpts) -> Result<Self> {
        let engine = Self::detect(dsn)?;
        let redacted = redact_credentials_in_dsn(Some(dsn));
        tracing::debug!(engine = %engine, dsn = %redacted, "connecting to database");

        let conn = match engine {
            #[cfg(feature = "pg")]
            DbEngine::Postgres => {
                let pool = sea_orm::sqlx::postgres::PgPoolOptions::new()
                    .apply(&opts)
                    .connect(dsn)
                    .await?;
                sea_orm::SqlxPostgresConnector::from_sqlx_postgres_pool(pool)
            }
            #[cfg(not(feature = "pg"))]
            DbEngine::Postgres => {
                return Err(DbError::FeatureDisabled("PostgreSQL feature not enabled"));
            }
            #[cfg(feature = "mysql")]
            DbEngine::MySql => {
                let pool = sea_orm::sqlx::mysql::MySqlPoolOptions::new()
                    .apply(&opts)
                    .connect(dsn)
                    .await?;
                sea_orm::SqlxMySqlConnector::from_sqlx_mysql_pool(pool)
            }
            #[cfg(not(feature = "mysql"))]
            DbEngine::MySql => return Err(DbError::FeatureDisabled("MySQL feature not enabled")),
            #[cfg(feature = "sqlite")]
            DbEngine::Sqlite => connect_sqlite(dsn, &opts).await?,
            #[cfg(not(feature = "sqlite"))]
            DbEngine::Sqlite => return Err(DbError::FeatureDisabled("SQLite feature not enabled")),
        };

        Ok(Self {
            engine,
            dsn: redacted,
            conn,
        })
    }

    #[must_use]
    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    #[must_use]
    pub fn backend(&self) -> DatabaseBackend {
        self.engine.backend()
    }

    /// Connection string with credentials redacted.
    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    #[must_use]
    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Round-trip to the server.
    ///
    /// # Errors
    /// Returns `DbError::Sea` if the database cannot be reached.
    pub async fn ping(&self) -> Result<()> {
        self.conn.ping().await.map_err(Into::into)
    }

    /// Begin a transaction on the pooled connection.
    ///
    /// # Errors
    /// Returns `DbError::Sea` if the transaction cannot be started.
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        self.conn.begin().await.map_err(Into::into)
    }

    /// Close the pool. Outstanding connections are dropped.
    ///
    /// # Errors
    /// Returns `DbError::Sea` if the pool reports a failure while closing.
    pub async fn close(self) -> Result<()> {
        tracing::debug!(dsn = %self.dsn, "closing database connection");
        self.conn.close().await.map_err(Into::into)
    }
}

/// True for in-memory `SQLite` DSNs.
#[must_use]
pub fn is_memory_dsn(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(dsn: &str, opts: &ConnectOpts) -> Result<DatabaseConnection> {
    use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    let mut options = SqliteConnectOptions::from_str(dsn)?;
    if !is_memory_dsn(dsn) {
        options = options.create_if_missing(true);
        if opts.create_sqlite_dirs
            && let Some(parent) = options.get_filename().parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .apply(opts)
        .connect_with(options)
        .await?;
    Ok(sea_orm::SqlxSqliteConnector::from_sqlx_sqlite_pool(pool))
}
