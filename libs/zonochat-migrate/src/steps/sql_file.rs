//! Versioned SQL files (`NNN_description.sql`).
//!
//! A file is one logical step. Its effects cannot be inspected generically,
//! so the history ledger decides whether it ran, and a checksum guards
//! against editing a file after it was applied.

use crate::error::{LoadError, StepError};
use crate::sql::split_statements;
use crate::step::{MigrationStep, StepContext, StepState};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

#[allow(clippy::expect_used)] // literal pattern, cannot fail
static FILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{3,})_[A-Za-z0-9_\-]+\.sql$").expect("static regex should not panic")
});

const CHANGED_GUIDANCE: &str =
    "an applied migration file must not be edited; revert it and add a new numbered file";

#[derive(Debug, Clone)]
pub struct SqlFileStep {
    name: String,
    version: Option<u64>,
    path: PathBuf,
    script: String,
    checksum: String,
}

impl SqlFileStep {
    /// Build a step from script text. `name` is the file stem.
    #[must_use]
    pub fn from_script(name: impl Into<String>, path: PathBuf, script: String) -> Self {
        let name = name.into();
        let checksum = format!("{:016x}", xxh3_64(script.as_bytes()));
        Self {
            version: parse_version(&name),
            name,
            path,
            script,
            checksum,
        }
    }

    /// Read a single file.
    ///
    /// # Errors
    /// Returns `LoadError::BadFileName` for files outside the naming scheme and
    /// `LoadError::Io` when the file cannot be read.
    pub async fn load(path: &Path) -> Result<Self, LoadError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let versioned = FILE_NAME_RE
            .captures(&file_name)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .is_some();
        if !versioned {
            return Err(LoadError::BadFileName { file: file_name });
        }
        let script = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let name = file_name.trim_end_matches(".sql").to_owned();
        Ok(Self::from_script(name, path.to_path_buf(), script))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Numeric prefix of the name: `7` for `007_channels`.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    #[must_use]
    pub fn script(&self) -> &str {
        &self.script
    }
}

fn parse_version(name: &str) -> Option<u64> {
    name.split('_').next()?.parse().ok()
}

#[async_trait]
impl MigrationStep for SqlFileStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> Option<&str> {
        Some(&self.checksum)
    }

    async fn check(&self, ctx: &StepContext<'_>) -> Result<StepState, StepError> {
        let Some(entry) = ctx.recorded(&self.name) else {
            return Ok(StepState::NeedsApply);
        };
        match entry.checksum.as_deref() {
            Some(recorded) if recorded != self.checksum => Err(StepError::precondition(
                format!(
                    "'{}' changed since it was applied (recorded checksum {recorded}, now {})",
                    self.path.display(),
                    self.checksum
                ),
                Some(CHANGED_GUIDANCE),
            )),
            _ => Ok(StepState::AlreadyApplied),
        }
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError> {
        let conn = ctx.conn();
        let statements = split_statements(&self.script, conn.backend()).map_err(|e| {
            StepError::precondition(
                format!("'{}' cannot be split into statements: {e}", self.path.display()),
                Some("fix the SQL syntax; nothing from this file was executed"),
            )
        })?;
        let mut rows = 0;
        for stmt in statements {
            debug!(file = %self.path.display(), line = stmt.line, "executing statement");
            rows += conn.execute_unprepared(&stmt.text).await?;
        }
        Ok(rows)
    }

    /// The file is trusted to be idempotent once it ran without error. The
    /// ledger entry written after this call is what marks it applied.
    async fn verify(&self, _ctx: &StepContext<'_>) -> Result<(), StepError> {
        Ok(())
    }
}

/// `.sql` files in `dir`, sorted by file name.
///
/// Names are not checked here; [`load_sql_dir`] validates them and orders
/// by version.
///
/// # Errors
/// Returns `LoadError::Io` if the directory cannot be listed.
pub async fn discover_sql_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let is_sql = path.extension().is_some_and(|ext| ext == "sql");
        if is_sql && entry.file_type().await.map_err(io_err)?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every versioned SQL file in `dir`, in apply order: ascending
/// numeric version, so `999_a` runs before `1000_b`.
///
/// # Errors
/// Returns `LoadError` if the directory or a file cannot be read, a file
/// does not follow the naming scheme, or two files share a version
/// (`004_a` and `0004_b` included).
pub async fn load_sql_dir(dir: &Path) -> Result<Vec<SqlFileStep>, LoadError> {
    let mut steps = Vec::new();
    for path in discover_sql_files(dir).await? {
        steps.push(SqlFileStep::load(&path).await?);
    }
    steps.sort_by(|a, b| (a.version, &a.name).cmp(&(b.version, &b.name)));

    for pair in steps.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if let Some(version) = next.version
            && prev.version == Some(version)
        {
            return Err(LoadError::DuplicateVersion {
                version,
                first: prev.name.clone(),
                second: next.name.clone(),
            });
        }
    }
    debug!(dir = %dir.display(), count = steps.len(), "loaded SQL migration files");
    Ok(steps)
}
