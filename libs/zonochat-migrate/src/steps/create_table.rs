use crate::error::StepError;
use crate::ident::Ident;
use crate::step::{MigrationStep, StepContext, StepState};
use async_trait::async_trait;

/// Creates a table when it is absent.
#[derive(Debug, Clone)]
pub struct CreateTableStep {
    name: String,
    table: Ident,
    ddl: String,
}

impl CreateTableStep {
    /// `ddl` must create `table`.
    #[must_use]
    pub fn new(name: impl Into<String>, table: Ident, ddl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table,
            ddl: ddl.into(),
        }
    }
}

#[async_trait]
impl MigrationStep for CreateTableStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &StepContext<'_>) -> Result<StepState, StepError> {
        if ctx.inspector().table_exists(&self.table).await? {
            Ok(StepState::AlreadyApplied)
        } else {
            Ok(StepState::NeedsApply)
        }
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError> {
        ctx.conn().execute_unprepared(&self.ddl).await?;
        Ok(0)
    }
}
