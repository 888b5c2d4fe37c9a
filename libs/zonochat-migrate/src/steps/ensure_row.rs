use crate::error::StepError;
use crate::ident::{Ident, placeholder};
use crate::step::{MigrationStep, StepContext, StepState};
use async_trait::async_trait;
use sea_orm::Value;

/// Inserts a row unless one with the same key already exists.
///
/// Existing rows are left untouched, so re-running never overwrites data
/// edited after the first insert.
#[derive(Debug, Clone)]
pub struct EnsureRowStep {
    name: String,
    table: Ident,
    key: Vec<(Ident, Value)>,
    values: Vec<(Ident, Value)>,
    guidance: Option<String>,
}

impl EnsureRowStep {
    #[must_use]
    pub fn new(name: impl Into<String>, table: Ident, key: Vec<(Ident, Value)>) -> Self {
        Self {
            name: name.into(),
            table,
            key,
            values: Vec::new(),
            guidance: None,
        }
    }

    /// Non-key column written on insert.
    #[must_use]
    pub fn value(mut self, column: Ident, value: impl Into<Value>) -> Self {
        self.values.push((column, value.into()));
        self
    }

    /// Hint reported when the table does not exist yet.
    #[must_use]
    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }
}

#[async_trait]
impl MigrationStep for EnsureRowStep {
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
        if inspector.row_exists(&self.table, &self.key).await? {
            Ok(StepState::AlreadyApplied)
        } else {
            Ok(StepState::NeedsApply)
        }
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<u64, StepError> {
        let conn = ctx.conn();
        let backend = conn.backend();
        let columns: Vec<&(Ident, Value)> = self.key.iter().chain(&self.values).collect();
        let names = columns
            .iter()
            .map(|(col, _)| col.quoted(backend))
            .collect::<Vec<_>>()
            .join(", ");
        let params = (1..=columns.len())
            .map(|n| placeholder(backend, n))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({names}) VALUES ({params})",
            self.table.quoted(backend)
        );
        conn.execute(conn.statement(&sql, columns.iter().map(|(_, v)| v.clone())))
            .await
    }
}
