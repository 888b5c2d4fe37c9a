use crate::backfill::{BackfillQuery, backfill_missing};
use crate::error::StepError;
use crate::step::{MigrationStep, StepContext, StepState};
use async_trait::async_trait;

/// Fills NULLs in a column via [`backfill_missing`].
///
/// Needs the column to exist, so it must run after the step that adds it.
#[derive(Debug, Clone)]
pub struct BackfillStep {
    name: String,
    query: BackfillQuery,
}

impl BackfillStep {
    #[must_use]
    pub fn new(name: impl Into<String>, query: BackfillQuery) -> Self {
        Self {
            name: name.into(),
            query,
        }
    }
}

#[async_trait]
impl MigrationStep for BackfillStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &StepContext<'_>) -> Result<StepState, StepError> {
        let inspector = ctx.inspector();
        let q = &self.query;
        let column_present = inspector.table_exists(&q.table).await?
            && inspector.column_exists(&q.table, &q.column).await?;
        if !column_present {
            return Err(StepError::precondition(
                format!("column {}.{} does not exist", q.table, q.column),
                q.guidance.as_deref(),
            ));
        }
        if inspector.count_null(&q.table, &q.column).await? > 0 {
            Ok(StepState::NeedsApply)
        } else {
            Ok(StepState::AlreadyApplied)
        }
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError> {
        Ok(backfill_missing(ctx, &self.query).await?.rows_affected)
    }
}
