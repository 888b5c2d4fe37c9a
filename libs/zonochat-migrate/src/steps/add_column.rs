use crate::error::StepError;
use crate::ident::Ident;
use crate::step::{MigrationStep, StepContext, StepState};
use async_trait::async_trait;

/// Adds a column to an existing table.
#[derive(Debug, Clone)]
pub struct AddColumnStep {
    name: String,
    table: Ident,
    column: Ident,
    /// Type and constraints, e.g. `INTEGER NULL`.
    definition: String,
    guidance: Option<String>,
}

impl AddColumnStep {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        table: Ident,
        column: Ident,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table,
            column,
            definition: definition.into(),
            guidance: None,
        }
    }

    /// Hint reported when the table does not exist yet.
    #[must_use]
    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }
}

#[async_trait]
impl MigrationStep for AddColumnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &StepContext<'_>) -> Result<StepState, StepError> {
        let inspector = ctx.inspector();
        if !inspector.table_exists(&self.table).await? {
            return Err(StepError::precondition(
                format!("table '{}' does not exist", self.table),
                self.guidance.as_deref(),
            ));
        }
        if inspector.column_exists(&self.table, &self.column).await? {
            Ok(StepState::AlreadyApplied)
        } else {
            Ok(StepState::NeedsApply)
        }
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError> {
        let conn = ctx.conn();
        let backend = conn.backend();
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table.quoted(backend),
            self.column.quoted(backend),
            self.definition
        );
        conn.execute_unprepared(&sql).await?;
        Ok(0)
    }
}
