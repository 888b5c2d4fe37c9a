//! Run and plan reports.

use crate::error::{ErrorKind, StepError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step was applied or skipped.
    Success,
    /// At least one step was applied before a failure or cancellation.
    PartialFailure,
    /// Nothing was applied and the run did not complete.
    Failure,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Applied,
    Skipped,
    Failed,
    NotRun,
}

impl StepOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotRun => "not_run",
        }
    }
}

/// Serializable form of a [`StepError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl From<&StepError> for StepFailure {
    fn from(err: &StepError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            sql: err.sql().map(str::to_owned),
            guidance: err.guidance().map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
}

impl StepReport {
    pub(crate) fn not_run(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            outcome: StepOutcome::NotRun,
            rows_affected: None,
            duration_ms: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// The run stopped early because cancellation was requested.
    pub cancelled: bool,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    /// Derive the status from step outcomes.
    #[must_use]
    pub fn status_of(steps: &[StepReport]) -> RunStatus {
        let complete = steps
            .iter()
            .all(|s| matches!(s.outcome, StepOutcome::Applied | StepOutcome::Skipped));
        if complete {
            RunStatus::Success
        } else if steps.iter().any(|s| s.outcome == StepOutcome::Applied) {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failure
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.steps.iter().filter(|s| s.outcome == outcome).count()
    }

    /// Human-readable summary, one line per step.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for s in &self.steps {
            _ = write!(out, "{:<8} {}", s.outcome.as_str(), s.name);
            if let Some(rows) = s.rows_affected {
                _ = write!(out, " rows={rows}");
            }
            if s.outcome != StepOutcome::NotRun {
                _ = write!(out, " ({} ms)", s.duration_ms);
            }
            out.push('\n');
            if let Some(err) = &s.error {
                _ = writeln!(out, "         error: {}", err.message);
                if let Some(sql) = &err.sql {
                    _ = writeln!(out, "         sql: {sql}");
                }
                if let Some(guidance) = &err.guidance {
                    _ = writeln!(out, "         hint: {guidance}");
                }
            }
        }
        _ = write!(
            out,
            "{}: {} applied, {} skipped, {} failed, {} not run in {} ms",
            self.status.as_str(),
            self.count(StepOutcome::Applied),
            self.count(StepOutcome::Skipped),
            self.count(StepOutcome::Failed),
            self.count(StepOutcome::NotRun),
            self.duration_ms
        );
        if self.cancelled {
            out.push_str(" (cancelled)");
        }
        out.push('\n');
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Pending,
    UpToDate,
    /// The check itself failed, often because an earlier pending step has
    /// not run yet.
    Blocked,
}

impl PlanState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UpToDate => "up_to_date",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub name: String,
    pub state: PlanState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
}

/// Read-only evaluation of every step's check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub steps: Vec<PlanEntry>,
}

impl PlanReport {
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.steps.iter().all(|s| s.state == PlanState::UpToDate)
    }

    #[must_use]
    pub fn count(&self, state: PlanState) -> usize {
        self.steps.iter().filter(|s| s.state == state).count()
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for s in &self.steps {
            _ = writeln!(out, "{:<10} {}", s.state.as_str(), s.name);
            if let Some(err) = &s.error {
                _ = writeln!(out, "           {}", err.message);
                if let Some(guidance) = &err.guidance {
                    _ = writeln!(out, "           hint: {guidance}");
                }
            }
        }
        _ = writeln!(
            out,
            "{} pending, {} up to date, {} blocked",
            self.count(PlanState::Pending),
            self.count(PlanState::UpToDate),
            self.count(PlanState::Blocked)
        );
        out
    }
}
