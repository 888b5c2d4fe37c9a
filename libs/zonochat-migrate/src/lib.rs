#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Idempotent schema migrations and data backfills for `ZonoChat`.
//!
//! A run is an ordered list of [`MigrationStep`]s. Each step inspects the
//! live schema (or the history ledger, for SQL files) before changing
//! anything, so re-running a completed plan is a no-op.
//!
//! ```rust,no_run
//! use zonochat_db::{ConnectOpts, DbHandle};
//! use zonochat_migrate::{MigrationRunner, RunnerOptions, TenancyConfig, builtin_steps};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let db = DbHandle::connect("sqlite://data/zonochat.db", ConnectOpts::default()).await?;
//! let steps = builtin_steps(&TenancyConfig::default(), &[]);
//! let runner = MigrationRunner::new(steps, RunnerOptions::default())?;
//! let report = runner.run(&db).await?;
//! println!("{}", report.render_text());
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod catalog;
pub mod conn;
pub mod error;
pub mod history;
pub mod ident;
pub mod inspector;
pub mod lint;
pub mod report;
pub mod runner;
pub mod sql;
pub mod step;
pub mod steps;

pub use backfill::{BackfillOutcome, BackfillQuery, DefaultValue, backfill_missing};
pub use catalog::{ChannelSeed, ChannelType, TenancyConfig, assemble, builtin_steps};
pub use conn::StepConn;
pub use error::{ErrorKind, IdentError, LoadError, RunnerError, StepError};
pub use history::{DEFAULT_HISTORY_TABLE, HistoryEntry, HistoryIndex};
pub use ident::Ident;
pub use inspector::SchemaInspector;
pub use lint::{LintFinding, LintRule, lint_dir, lint_sql};
pub use report::{
    PlanEntry, PlanReport, PlanState, RunReport, RunStatus, StepFailure, StepOutcome, StepReport,
};
pub use runner::{MigrationRunner, RunnerOptions, TransactionMode};
pub use step::{DEFAULT_AUDIT_LIMIT, MAX_AUDIT_LIMIT, MigrationStep, StepContext, StepState};
pub use steps::{
    AddColumnStep, BackfillStep, CreateTableStep, EnsureRowStep, SqlFileStep, discover_sql_files,
    load_sql_dir,
};
