//! Database connection settings and DSN resolution.
//!
//! A connection is described either by a full `dsn` or by its parts
//! (`engine`, `host`, `port`, `user`, `password`, `dbname`, or `path` for
//! `SQLite`). Parts are assembled into a DSN with proper percent-encoding.
//!
//! Development builds may fall back to local defaults for missing parts.
//! Outside development every part must be configured explicitly.

use crate::{DbError, Result};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

const DEV_HOST: &str = "localhost";
const DEV_USER: &str = "root";
const DEV_DBNAME: &str = "zonochat";

#[allow(clippy::expect_used)] // literal pattern, cannot fail
static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex should not panic")
});

/// Database engine selector used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngineCfg {
    Sqlite,
    #[serde(alias = "pg", alias = "postgresql")]
    Postgres,
    #[serde(alias = "mariadb")]
    Mysql,
}

impl DbEngineCfg {
    fn scheme(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }

    fn default_port(self) -> Option<u16> {
        match self {
            Self::Sqlite => None,
            Self::Postgres => Some(5432),
            Self::Mysql => Some(3306),
        }
    }
}

/// Connection settings for the single database the migrator works on.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConnConfig {
    /// Full connection string. Takes precedence over the individual parts.
    #[serde(
        serialize_with = "serialize_redacted_dsn",
        skip_serializing_if = "Option::is_none"
    )]
    pub dsn: Option<String>,
    pub engine: Option<DbEngineCfg>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// Never serialized. `${VAR}` references are expanded at resolve time.
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
    pub dbname: Option<String>,
    /// `SQLite` database file.
    pub path: Option<PathBuf>,
}

impl DbConnConfig {
    /// Resolve the settings into a connection string.
    ///
    /// With `allow_dev_defaults`, a missing engine defaults to `MySQL` and missing
    /// host/user/dbname/password fall back to local development values.
    ///
    /// # Errors
    /// Returns `DbError::ConfigConflict` for contradictory settings,
    /// `DbError::MissingSetting` when a required part is absent, and
    /// `DbError::EnvVar` when a referenced environment variable is unset.
    pub fn resolve_dsn(&self, allow_dev_defaults: bool) -> Result<String> {
        self.validate_consistency()?;

        if let Some(dsn) = &self.dsn {
            return expand_env_vars(dsn.trim());
        }

        let engine = match self.engine {
            Some(engine) => engine,
            None if allow_dev_defaults => DbEngineCfg::Mysql,
            None => {
                return Err(DbError::MissingSetting {
                    field: "database.engine",
                });
            }
        };

        match engine {
            DbEngineCfg::Sqlite => {
                let path = self.path.as_ref().ok_or(DbError::MissingSetting {
                    field: "database.path",
                })?;
                Ok(format!("sqlite://{}", path.display()))
            }
            DbEngineCfg::Postgres | DbEngineCfg::Mysql => {
                self.server_dsn(engine, allow_dev_defaults)
            }
        }
    }

    fn server_dsn(&self, engine: DbEngineCfg, allow_dev_defaults: bool) -> Result<String> {
        let host = required(self.host.as_deref(), "database.host", DEV_HOST, allow_dev_defaults)?;
        let user = required(self.user.as_deref(), "database.user", DEV_USER, allow_dev_defaults)?;
        let dbname = required(
            self.dbname.as_deref(),
            "database.dbname",
            DEV_DBNAME,
            allow_dev_defaults,
        )?;
        let password = match &self.password {
            Some(secret) => expand_env_vars(secret.expose_secret())?,
            None if allow_dev_defaults => String::new(),
            None => {
                return Err(DbError::MissingSetting {
                    field: "database.password",
                });
            }
        };

        let mut url = Url::parse(&format!("{}://{host}", engine.scheme()))?;
        let port = self.port.or_else(|| engine.default_port());
        url.set_port(port)
            .map_err(|()| DbError::InvalidConfig(format!("cannot set port on host '{host}'")))?;
        url.set_username(&user)
            .map_err(|()| DbError::InvalidConfig(format!("cannot set user on host '{host}'")))?;
        if !password.is_empty() {
            url.set_password(Some(&password)).map_err(|()| {
                DbError::InvalidConfig(format!("cannot set password on host '{host}'"))
            })?;
        }
        url.set_path(&dbname);

        Ok(url.to_string())
    }

    fn validate_consistency(&self) -> Result<()> {
        if let (Some(engine), Some(dsn)) = (self.engine, self.dsn.as_deref()) {
            let inferred = engine_from_dsn(dsn)?;
            if inferred != engine {
                return Err(DbError::ConfigConflict(format!(
                    "engine='{engine:?}' conflicts with DSN scheme inferred as '{inferred:?}'"
                )));
            }
        }

        let has_server_fields = self.host.is_some() || self.port.is_some();
        if self.path.is_some() && has_server_fields {
            return Err(DbError::ConfigConflict(
                "SQLite 'path' cannot be combined with host/port".to_owned(),
            ));
        }

        if self.engine == Some(DbEngineCfg::Sqlite)
            && (has_server_fields || self.user.is_some() || self.dbname.is_some())
        {
            return Err(DbError::ConfigConflict(
                "engine=sqlite cannot be used with host/port/user/dbname".to_owned(),
            ));
        }

        Ok(())
    }
}

fn required(
    value: Option<&str>,
    field: &'static str,
    dev_default: &str,
    allow_dev_defaults: bool,
) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => expand_env_vars(v.trim()),
        _ if allow_dev_defaults => Ok(dev_default.to_owned()),
        _ => Err(DbError::MissingSetting { field }),
    }
}

/// Infer the engine from a DSN scheme.
///
/// # Errors
/// Returns `DbError::UnknownDsn` for unrecognized schemes.
pub fn engine_from_dsn(dsn: &str) -> Result<DbEngineCfg> {
    let s = dsn.trim_start();
    if s.starts_with("postgres://") || s.starts_with("postgresql://") {
        Ok(DbEngineCfg::Postgres)
    } else if s.starts_with("mysql://") {
        Ok(DbEngineCfg::Mysql)
    } else if s.starts_with("sqlite:") {
        Ok(DbEngineCfg::Sqlite)
    } else {
        Err(DbError::UnknownDsn(redact_credentials_in_dsn(Some(dsn))))
    }
}

/// Expand `${VAR}` references from the process environment.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_owned();
    for caps in ENV_VAR_RE.captures_iter(input) {
        let var = &caps[1];
        let value = std::env::var(var).map_err(|source| DbError::EnvVar {
            var: var.to_owned(),
            source,
        })?;
        result = result.replace(&caps[0], &value);
    }
    Ok(result)
}

/// Query keys that carry a password in some drivers' DSNs.
const SECRET_QUERY_KEYS: [&str; 3] = ["password", "pwd", "passwd"];

/// Redact credentials from a DSN for logging.
///
/// Covers the userinfo password and `password=` style query pairs. A DSN
/// that cannot be parsed is fully hidden when it looks like it holds
/// credentials.
#[must_use]
pub fn redact_credentials_in_dsn(dsn: Option<&str>) -> String {
    let Some(dsn) = dsn else {
        return "none".to_owned();
    };
    let Ok(mut parsed) = Url::parse(dsn) else {
        let lower = dsn.to_ascii_lowercase();
        let suspicious =
            dsn.contains('@') || SECRET_QUERY_KEYS.iter().any(|k| lower.contains(&format!("{k}=")));
        return if suspicious { "***".to_owned() } else { dsn.to_owned() };
    };

    let mut changed = false;
    if parsed.password().is_some() {
        _ = parsed.set_password(Some("***"));
        changed = true;
    }
    let is_secret = |key: &str| SECRET_QUERY_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k));
    if parsed.query_pairs().any(|(k, _)| is_secret(&*k)) {
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                let v = if is_secret(&*k) { "***".to_owned() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
        changed = true;
    }
    if changed { parsed.to_string() } else { dsn.to_owned() }
}

#[allow(clippy::ref_option)] // signature required by `serialize_with`
fn serialize_redacted_dsn<S: Serializer>(
    dsn: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&redact_credentials_in_dsn(dsn.as_deref()))
}
