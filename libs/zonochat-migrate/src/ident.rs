//! Validated SQL identifiers.

use crate::error::IdentError;
use regex::Regex;
use sea_orm::DatabaseBackend;
use std::fmt;
use std::sync::LazyLock;

/// `PostgreSQL` truncates identifiers beyond this length.
const MAX_IDENT_LEN: usize = 63;

#[allow(clippy::expect_used)] // literal pattern, cannot fail
static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex should not panic")
});

/// A table or column name that is safe to interpolate once quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// Validate `name` as an identifier.
    ///
    /// # Errors
    /// Returns `IdentError` if the name is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_]`.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentError {
                ident: name,
                reason: "empty",
            });
        }
        if name.len() > MAX_IDENT_LEN {
            return Err(IdentError {
                ident: name,
                reason: "longer than 63 bytes",
            });
        }
        if !IDENT_RE.is_match(&name) {
            return Err(IdentError {
                ident: name,
                reason: "must match [A-Za-z_][A-Za-z0-9_]*",
            });
        }
        Ok(Self(name))
    }

    /// The conventional `id` key column.
    #[must_use]
    pub fn id() -> Self {
        Self::known("id")
    }

    /// Names fixed in code and covered by tests; not validated at runtime.
    pub(crate) fn known(name: &'static str) -> Self {
        debug_assert!(IDENT_RE.is_match(name) && name.len() <= MAX_IDENT_LEN);
        Self(name.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quote for `backend`: backticks on `MySQL`, double quotes elsewhere.
    #[must_use]
    pub fn quoted(&self, backend: DatabaseBackend) -> String {
        match backend {
            DatabaseBackend::MySql => format!("`{}`", self.0),
            DatabaseBackend::Postgres | DatabaseBackend::Sqlite => format!("\"{}\"", self.0),
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Ident {
    type Error = IdentError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Positional bind placeholder (1-based) for `backend`.
pub(crate) fn placeholder(backend: DatabaseBackend, n: usize) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("${n}"),
        DatabaseBackend::MySql | DatabaseBackend::Sqlite => "?".to_owned(),
    }
}

/// Cast expression rendering `expr` as text, used to report key values
/// regardless of the key column type.
pub(crate) fn cast_to_text(backend: DatabaseBackend, expr: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("CAST({expr} AS CHAR)"),
        DatabaseBackend::Postgres | DatabaseBackend::Sqlite => format!("CAST({expr} AS TEXT)"),
    }
}
