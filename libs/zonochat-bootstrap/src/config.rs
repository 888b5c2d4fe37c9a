//! Layered application configuration.
//!
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. YAML file (`--config`)
//! 3. legacy `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`, `DB_NAME`
//! 4. `ZONOCHAT__*` environment variables, nested with `__`
//!    (`ZONOCHAT__DATABASE__HOST`, `ZONOCHAT__MIGRATIONS__AUDIT_LIMIT`)
//! 5. CLI overrides

use crate::logging::LoggingConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use zonochat_db::{DbConnConfig, DbError};
use zonochat_migrate::{
    ChannelSeed, DEFAULT_AUDIT_LIMIT, DEFAULT_HISTORY_TABLE, Ident, IdentError, MAX_AUDIT_LIMIT,
    RunnerOptions, TenancyConfig, TransactionMode,
};

pub const ENV_PREFIX: &str = "ZONOCHAT__";

/// Legacy variable name and the `database` field it sets.
const LEGACY_DB_ENV: [(&str, &str); 5] = [
    ("DB_HOST", "host"),
    ("DB_PORT", "port"),
    ("DB_USER", "user"),
    ("DB_PASSWORD", "password"),
    ("DB_NAME", "dbname"),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file does not exist: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Figment(#[source] Box<figment::Error>),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("migrations.history_table: {0}")]
    HistoryTable(#[from] IdentError),

    #[error("migrations.audit_limit must be between 1 and {}", MAX_AUDIT_LIMIT)]
    AuditLimit,

    #[error("failed to render configuration: {0}")]
    Render(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development: missing database settings fall back to local defaults.
    #[default]
    Development,
    /// Every database setting must be configured.
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Directory of `NNN_description.sql` files. No SQL steps when unset.
    pub sql_dir: Option<PathBuf>,
    /// Include the built-in tenancy and channel steps.
    pub builtin: bool,
    pub transaction_mode: TransactionMode,
    pub audit_limit: usize,
    pub history_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            sql_dir: None,
            builtin: true,
            transaction_mode: TransactionMode::Auto,
            audit_limit: DEFAULT_AUDIT_LIMIT,
            history_table: DEFAULT_HISTORY_TABLE.to_owned(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DbConnConfig,
    pub logging: LoggingConfig,
    pub migrations: MigrationsConfig,
    pub tenancy: TenancyConfig,
    /// Channels to seed when absent.
    pub channels: Vec<ChannelSeed>,
}

/// Values taken from the command line, applied last.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub dsn: Option<String>,
    pub sql_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from defaults, an optional YAML file and the
    /// environment.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingFile` if `path` does not exist, or
    /// another `ConfigError` when a layer cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::figment(path)?
            .extract()
            .map_err(|e| ConfigError::Figment(Box::new(e)))
    }

    /// The layered figment before extraction.
    ///
    /// # Errors
    /// See [`AppConfig::load`].
    pub fn figment(path: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::MissingFile {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Yaml::file(path));
        }

        if let Some(legacy) = legacy_database_env()? {
            figment = figment.merge(Serialized::defaults(legacy));
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn apply_cli_overrides(&mut self, cli: &CliOverrides) {
        if let Some(dsn) = &cli.dsn {
            self.database.dsn = Some(dsn.clone());
        }
        if let Some(dir) = &cli.sql_dir {
            self.migrations.sql_dir = Some(dir.clone());
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Connection string for the configured database.
    ///
    /// # Errors
    /// Returns `ConfigError::Database` when settings conflict or, outside
    /// development, a required setting is missing.
    pub fn database_dsn(&self) -> Result<String, ConfigError> {
        Ok(self.database.resolve_dsn(!self.is_production())?)
    }

    /// Check everything that can be checked without a database.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database_dsn()?;
        Ident::new(self.migrations.history_table.as_str())?;
        if !(1..=MAX_AUDIT_LIMIT).contains(&self.migrations.audit_limit) {
            return Err(ConfigError::AuditLimit);
        }
        Ok(())
    }

    /// Runner options for this configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::HistoryTable` for an invalid ledger table name.
    pub fn runner_options(&self, cancel: CancellationToken) -> Result<RunnerOptions, ConfigError> {
        Ok(RunnerOptions {
            transaction_mode: self.migrations.transaction_mode,
            history_table: Ident::new(self.migrations.history_table.as_str())?,
            audit_limit: self.migrations.audit_limit,
            cancel,
        })
    }

    /// Effective configuration as pretty JSON. Secrets are omitted and DSN
    /// credentials redacted.
    ///
    /// # Errors
    /// Returns `ConfigError::Render` if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `{"database": {...}}` from the legacy `DB_*` variables, if any is set.
fn legacy_database_env() -> Result<Option<Value>, ConfigError> {
    let mut database = Map::new();
    for (var, field) in LEGACY_DB_ENV {
        let Ok(raw) = std::env::var(var) else {
            continue;
        };
        let value = if field == "port" {
            let port: u16 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value: raw })?;
            Value::from(port)
        } else {
            Value::from(raw)
        };
        database.insert(field.to_owned(), value);
    }

    if database.is_empty() {
        return Ok(None);
    }
    let mut root = Map::new();
    root.insert("database".to_owned(), Value::Object(database));
    Ok(Some(Value::Object(root)))
}
