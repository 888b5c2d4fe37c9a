//! Ordered, idempotent execution of migration steps.
//!
//! For each step, in the given order:
//! 1. `check` whether the change is already in place
//! 2. skip it without writing anything if it is
//! 3. otherwise `apply`, `verify`, and record it in the history ledger
//! 4. on any error, report it and leave the remaining steps `not_run`
//!
//! Steps run inside a transaction when the engine rolls DDL back with it
//! (see [`TransactionMode`]). Cancellation is honored between steps.

use crate::conn::StepConn;
use crate::error::{RunnerError, StepError};
use crate::history::{DEFAULT_HISTORY_TABLE, HistoryEntry, HistoryIndex, HistoryLedger};
use crate::ident::Ident;
use crate::report::{
    PlanEntry, PlanReport, PlanState, RunReport, StepFailure, StepOutcome, StepReport,
};
use crate::step::{DEFAULT_AUDIT_LIMIT, MigrationStep, StepContext, StepState};
use chrono::{SecondsFormat, Utc};
use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zonochat_db::{DbEngine, DbHandle};

/// When steps are wrapped in a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Per-step transactions on engines with transactional DDL (`PostgreSQL`,
    /// `SQLite`); none on `MySQL`, which commits implicitly around DDL.
    #[default]
    Auto,
    Always,
    Never,
}

impl TransactionMode {
    #[must_use]
    pub fn uses_transactions(self, engine: DbEngine) -> bool {
        match self {
            Self::Auto => engine.supports_transactional_ddl(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub transaction_mode: TransactionMode,
    pub history_table: Ident,
    /// Cap on row keys listed by backfill audit logging.
    pub audit_limit: usize,
    pub cancel: CancellationToken,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::Auto,
            history_table: Ident::known(DEFAULT_HISTORY_TABLE),
            audit_limit: DEFAULT_AUDIT_LIMIT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Owns an ordered list of steps for the duration of a run.
pub struct MigrationRunner {
    steps: Vec<Box<dyn MigrationStep>>,
    options: RunnerOptions,
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("steps", &self.step_names())
            .field("options", &self.options)
            .finish()
    }
}

enum Applied {
    Skipped,
    Rows(u64),
}

impl MigrationRunner {
    /// # Errors
    /// Returns `RunnerError::DuplicateStepName` if two steps share a name.
    pub fn new(
        steps: Vec<Box<dyn MigrationStep>>,
        options: RunnerOptions,
    ) -> Result<Self, RunnerError> {
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name()) {
                return Err(RunnerError::DuplicateStepName {
                    name: step.name().to_owned(),
                });
            }
        }
        Ok(Self { steps, options })
    }

    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Execute every pending step in order.
    ///
    /// Step failures do not make this return `Err`: they are reported in the
    /// returned [`RunReport`] and halt the remaining steps.
    ///
    /// # Errors
    /// Returns `RunnerError::Connectivity` if the database cannot be reached
    /// before the first step, or `RunnerError::History` if the ledger table
    /// cannot be created or read.
    pub async fn run(&self, db: &DbHandle) -> Result<RunReport, RunnerError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        db.conn()
            .ping()
            .await
            .map_err(|source| RunnerError::Connectivity { source })?;

        let ledger = HistoryLedger::new(self.options.history_table.clone());
        let direct = StepConn::Direct(db.conn());
        ledger
            .ensure(direct)
            .await
            .map_err(|e| RunnerError::from_history(ledger.table().as_str(), e))?;
        let history = ledger
            .load(direct)
            .await
            .map_err(|e| RunnerError::from_history(ledger.table().as_str(), e))?;

        let use_tx = self.options.transaction_mode.uses_transactions(db.engine());
        info!(
            engine = %db.engine(),
            steps = self.steps.len(),
            transactional = use_tx,
            "starting migration run"
        );

        let mut reports = Vec::with_capacity(self.steps.len());
        let mut cancelled = false;
        for (idx, step) in self.steps.iter().enumerate() {
            if self.options.cancel.is_cancelled() {
                warn!(step = step.name(), "cancellation requested, stopping before step");
                cancelled = true;
                self.mark_not_run(idx, &mut reports);
                break;
            }

            let report = self
                .execute_step(step.as_ref(), db, &ledger, &history, use_tx)
                .await;
            let failed = report.outcome == StepOutcome::Failed;
            reports.push(report);
            if failed {
                self.mark_not_run(idx + 1, &mut reports);
                break;
            }
        }

        let report = RunReport {
            status: RunReport::status_of(&reports),
            started_at,
            duration_ms: millis(clock.elapsed()),
            cancelled,
            steps: reports,
        };
        info!(
            status = report.status.as_str(),
            applied = report.count(StepOutcome::Applied),
            skipped = report.count(StepOutcome::Skipped),
            failed = report.count(StepOutcome::Failed),
            not_run = report.count(StepOutcome::NotRun),
            cancelled,
            duration_ms = report.duration_ms,
            "migration run complete"
        );
        Ok(report)
    }

    /// Evaluate every step's check without writing anything, including the
    /// ledger table.
    ///
    /// # Errors
    /// Returns `RunnerError::Connectivity` if the database cannot be reached,
    /// or `RunnerError::History` if an existing ledger cannot be read.
    pub async fn plan(&self, db: &DbHandle) -> Result<PlanReport, RunnerError> {
        db.conn()
            .ping()
            .await
            .map_err(|source| RunnerError::Connectivity { source })?;

        let ledger = HistoryLedger::new(self.options.history_table.clone());
        let direct = StepConn::Direct(db.conn());
        let table = ledger.table().as_str();
        let history = if ledger
            .exists(direct)
            .await
            .map_err(|e| RunnerError::from_history(table, e))?
        {
            ledger
                .load(direct)
                .await
                .map_err(|e| RunnerError::from_history(table, e))?
        } else {
            HistoryIndex::new()
        };

        let ctx = StepContext::new(direct, &history, self.options.audit_limit);
        let mut entries = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let (state, error) = match step.check(&ctx).await {
                Ok(StepState::AlreadyApplied) => (PlanState::UpToDate, None),
                Ok(StepState::NeedsApply) => (PlanState::Pending, None),
                Err(err) => (PlanState::Blocked, Some(StepFailure::from(&err))),
            };
            debug!(step = step.name(), state = state.as_str(), "planned step");
            entries.push(PlanEntry {
                name: step.name().to_owned(),
                state,
                error,
            });
        }
        Ok(PlanReport { steps: entries })
    }

    fn mark_not_run(&self, from: usize, reports: &mut Vec<StepReport>) {
        reports.extend(
            self.steps
                .iter()
                .skip(from)
                .map(|s| StepReport::not_run(s.name())),
        );
    }

    async fn execute_step(
        &self,
        step: &dyn MigrationStep,
        db: &DbHandle,
        ledger: &HistoryLedger,
        history: &HistoryIndex,
        use_tx: bool,
    ) -> StepReport {
        let name = step.name();
        let clock = Instant::now();

        let result = if use_tx {
            self.drive_in_transaction(step, db, ledger, history, clock)
                .await
        } else {
            let ctx = StepContext::new(
                StepConn::Direct(db.conn()),
                history,
                self.options.audit_limit,
            );
            drive(step, &ctx, ledger, clock).await
        };
        let duration_ms = millis(clock.elapsed());

        match result {
            Ok(Applied::Skipped) => {
                info!(step = name, "already applied, skipping");
                StepReport {
                    name: name.to_owned(),
                    outcome: StepOutcome::Skipped,
                    rows_affected: None,
                    duration_ms,
                    error: None,
                }
            }
            Ok(Applied::Rows(rows)) => {
                info!(step = name, rows_affected = rows, duration_ms, "step applied");
                StepReport {
                    name: name.to_owned(),
                    outcome: StepOutcome::Applied,
                    rows_affected: Some(rows),
                    duration_ms,
                    error: None,
                }
            }
            Err(err) => {
                error!(
                    step = name,
                    kind = ?err.kind(),
                    sql = err.sql().unwrap_or(""),
                    guidance = err.guidance().unwrap_or(""),
                    error = %err,
                    "step failed"
                );
                StepReport {
                    name: name.to_owned(),
                    outcome: StepOutcome::Failed,
                    rows_affected: None,
                    duration_ms,
                    error: Some(StepFailure::from(&err)),
                }
            }
        }
    }

    async fn drive_in_transaction(
        &self,
        step: &dyn MigrationStep,
        db: &DbHandle,
        ledger: &HistoryLedger,
        history: &HistoryIndex,
        clock: Instant,
    ) -> Result<Applied, StepError> {
        let txn = db
            .conn()
            .begin()
            .await
            .map_err(|e| StepError::from_db(e, None))?;
        let ctx = StepContext::new(StepConn::Tx(&txn), history, self.options.audit_limit);

        match drive(step, &ctx, ledger, clock).await {
            Ok(applied) => {
                txn.commit()
                    .await
                    .map_err(|e| StepError::from_db(e, Some("COMMIT")))?;
                Ok(applied)
            }
            Err(err) => {
                debug!(step = step.name(), "rolling back step transaction");
                _ = txn.rollback().await;
                Err(err)
            }
        }
    }
}

/// check → apply → verify → record, on whatever connection `ctx` carries.
async fn drive(
    step: &dyn MigrationStep,
    ctx: &StepContext<'_>,
    ledger: &HistoryLedger,
    clock: Instant,
) -> Result<Applied, StepError> {
    if step.check(ctx).await? == StepState::AlreadyApplied {
        return Ok(Applied::Skipped);
    }

    info!(step = step.name(), "applying step");
    let rows = step.apply(ctx).await?;
    step.verify(ctx).await?;

    let entry = HistoryEntry {
        name: step.name().to_owned(),
        checksum: step.checksum().map(str::to_owned),
        applied_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        rows_affected: rows,
        duration_ms: millis(clock.elapsed()),
    };
    ledger.record(ctx.conn(), &entry).await?;
    Ok(Applied::Rows(rows))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
