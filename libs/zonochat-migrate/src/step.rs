//! The migration step contract.

use crate::conn::StepConn;
use crate::error::StepError;
use crate::history::{HistoryEntry, HistoryIndex};
use crate::inspector::SchemaInspector;
use async_trait::async_trait;
use serde::Serialize;

/// Default cap on the number of row keys a backfill reports.
pub const DEFAULT_AUDIT_LIMIT: usize = 500;

/// Upper bound for the audit cap. The audit re-select binds one parameter
/// per key, and every supported engine accepts at least this many.
pub const MAX_AUDIT_LIMIT: usize = 10_000;

/// Result of inspecting whether a step's change is already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    AlreadyApplied,
    NeedsApply,
}

/// A named, idempotent unit of schema or data change.
///
/// `apply` must be safe to re-invoke: the runner always calls `check` first
/// and only applies when it reports [`StepState::NeedsApply`].
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Unique name within a run. Also the key in the history ledger.
    fn name(&self) -> &str;

    /// Content checksum recorded in the ledger, when the step has one.
    fn checksum(&self) -> Option<&str> {
        None
    }

    /// Inspect the database.
    async fn check(&self, ctx: &StepContext<'_>) -> Result<StepState, StepError>;

    /// Perform the change and return the number of affected rows.
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError>;

    /// Confirm the change landed. Defaults to re-running [`check`](Self::check).
    async fn verify(&self, ctx: &StepContext<'_>) -> Result<(), StepError> {
        match self.check(ctx).await? {
            StepState::AlreadyApplied => Ok(()),
            StepState::NeedsApply => Err(StepError::Verification {
                message: format!("'{}' still needs to be applied after apply", self.name()),
            }),
        }
    }
}

/// What a step sees while it runs.
#[derive(Debug)]
pub struct StepContext<'a> {
    conn: StepConn<'a>,
    history: &'a HistoryIndex,
    audit_limit: usize,
}

impl<'a> StepContext<'a> {
    #[must_use]
    pub fn new(conn: StepConn<'a>, history: &'a HistoryIndex, audit_limit: usize) -> Self {
        Self {
            conn,
            history,
            audit_limit,
        }
    }

    #[must_use]
    pub fn conn(&self) -> StepConn<'a> {
        self.conn
    }

    #[must_use]
    pub fn inspector(&self) -> SchemaInspector<'a> {
        SchemaInspector::new(self.conn)
    }

    /// Ledger entry recorded for `name` before this run started.
    #[must_use]
    pub fn recorded(&self, name: &str) -> Option<&HistoryEntry> {
        self.history.get(name)
    }

    /// Audit cap, never above [`MAX_AUDIT_LIMIT`].
    #[must_use]
    pub fn audit_limit(&self) -> usize {
        self.audit_limit.min(MAX_AUDIT_LIMIT)
    }
}
