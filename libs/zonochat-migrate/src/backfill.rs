//! Defaulting UPDATE for rows that are missing a required value.
//!
//! The typical case is assigning the default tenant to users created before
//! tenancy existed:
//!
//! ```text
//! UPDATE users SET tenant_id = 1 WHERE tenant_id IS NULL
//! ```
//!
//! When the default refers to another table, the referenced row must exist
//! before anything is written.

use crate::error::StepError;
use crate::ident::{Ident, cast_to_text, placeholder};
use crate::step::StepContext;
use sea_orm::Value;
use tracing::info;

/// Where the fallback value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// A plain value with no referential requirement.
    Literal(Value),
    /// A key that must exist as `table.column = value` before the update.
    Reference {
        table: Ident,
        column: Ident,
        value: Value,
    },
}

impl DefaultValue {
    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            Self::Literal(value) | Self::Reference { value, .. } => value,
        }
    }
}

/// Which rows to fill and with what.
#[derive(Debug, Clone)]
pub struct BackfillQuery {
    pub table: Ident,
    pub column: Ident,
    /// Column identifying rows in audit output. `id` unless overridden.
    pub key_column: Ident,
    pub default: DefaultValue,
    /// Hint attached to a missing-reference failure.
    pub guidance: Option<String>,
}

impl BackfillQuery {
    #[must_use]
    pub fn new(table: Ident, column: Ident, default: DefaultValue) -> Self {
        Self {
            table,
            column,
            key_column: Ident::id(),
            default,
            guidance: None,
        }
    }

    #[must_use]
    pub fn with_key_column(mut self, key_column: Ident) -> Self {
        self.key_column = key_column;
        self
    }

    #[must_use]
    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }
}

/// Outcome of one backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub rows_affected: u64,
    /// Keys of the filled rows, capped at the context's audit limit.
    pub audited_keys: Vec<String>,
    /// More rows were filled than `audited_keys` lists.
    pub truncated: bool,
}

/// Assign the default to every row whose column is NULL.
///
/// 1. count rows needing the value, and select their keys for the audit
/// 2. for a reference default, require the referenced row
/// 3. one bulk `UPDATE ... WHERE column IS NULL`
/// 4. re-select the filled rows for the audit log
///
/// No rows needing a value is a success with `rows_affected = 0`. Keys only
/// feed the audit: rows whose key is NULL are still filled.
///
/// # Errors
/// Returns `StepError::Precondition` when the referenced row is missing (no
/// update is issued), or `StepError::Apply`/`StepError::Connectivity` when a
/// statement fails.
pub async fn backfill_missing(
    ctx: &StepContext<'_>,
    query: &BackfillQuery,
) -> Result<BackfillOutcome, StepError> {
    let conn = ctx.conn();
    let backend = conn.backend();
    let table = query.table.quoted(backend);
    let column = query.column.quoted(backend);
    let key_text = cast_to_text(backend, &query.key_column.quoted(backend));
    let limit = ctx.audit_limit();

    let missing = ctx.inspector().count_null(&query.table, &query.column).await?;
    if missing == 0 {
        info!(table = %query.table, column = %query.column, "no rows need backfill");
        return Ok(BackfillOutcome {
            rows_affected: 0,
            audited_keys: Vec::new(),
            truncated: false,
        });
    }

    if let DefaultValue::Reference {
        table: ref_table,
        column: ref_column,
        value,
    } = &query.default
    {
        let inspector = ctx.inspector();
        let present = inspector.table_exists(ref_table).await?
            && inspector
                .row_exists(ref_table, &[(ref_column.clone(), value.clone())])
                .await?;
        if !present {
            return Err(StepError::precondition(
                format!(
                    "default {ref_table}.{ref_column} = {} does not exist; \
                     refusing to backfill {}.{}",
                    render_value(value),
                    query.table,
                    query.column
                ),
                query.guidance.as_deref(),
            ));
        }
    }

    let select_missing = format!(
        "SELECT {key_text} FROM {table} WHERE {column} IS NULL ORDER BY {} LIMIT {}",
        query.key_column.quoted(backend),
        limit.saturating_add(1)
    );
    let candidates = read_keys(&conn.query_all(conn.statement(&select_missing, [])).await?);

    let update = format!(
        "UPDATE {table} SET {column} = {} WHERE {column} IS NULL",
        placeholder(backend, 1)
    );
    let rows_affected = conn
        .execute(conn.statement(&update, [query.default.value().clone()]))
        .await?;

    let mut audited_keys = candidates;
    let truncated = audited_keys.len() > limit || rows_affected > as_u64(limit);
    audited_keys.truncate(limit);
    if !audited_keys.is_empty() {
        let params = (0..audited_keys.len())
            .map(|i| placeholder(backend, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let reselect = format!(
            "SELECT {key_text} FROM {table} WHERE {column} = {} AND {key_text} IN ({params}) \
             ORDER BY {}",
            placeholder(backend, 1),
            query.key_column.quoted(backend)
        );
        let values = std::iter::once(query.default.value().clone())
            .chain(audited_keys.iter().map(|k| Value::from(k.as_str())));
        audited_keys = read_keys(&conn.query_all(conn.statement(&reselect, values)).await?);
    }

    info!(
        table = %query.table,
        column = %query.column,
        rows_affected,
        keys = %audited_keys.join(","),
        truncated,
        "backfilled rows"
    );

    Ok(BackfillOutcome {
        rows_affected,
        audited_keys,
        truncated,
    })
}

fn read_keys(rows: &[sea_orm::QueryResult]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.try_get_by_index::<String>(0).ok())
        .collect()
}

fn as_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(Some(s)) => format!("'{s}'"),
        Value::Int(Some(n)) => i64::from(*n).to_string(),
        Value::BigInt(Some(n)) => n.to_string(),
        _ => "the configured value".to_owned(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::conn::StepConn;
    use crate::history::HistoryIndex;
    use crate::step::MAX_AUDIT_LIMIT;
    use sea_orm::ConnectionTrait;
    use tracing_test::traced_test;
    use zonochat_db::{ConnectOpts, DbHandle};

    async fn seeded() -> DbHandle {
        let db = DbHandle::connect("sqlite::memory:", ConnectOpts::default())
            .await
            .unwrap();
        for sql in [
            "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            "INSERT INTO tenants (id, name) VALUES (1, 'Demo')",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT, tenant_id INTEGER NULL)",
            "INSERT INTO users (id, email, tenant_id) \
             VALUES (1, 'a@x', NULL), (2, 'b@x', 5), (3, 'c@x', NULL)",
        ] {
            db.conn().execute_unprepared(sql).await.unwrap();
        }
        db
    }

    fn tenant_query() -> BackfillQuery {
        BackfillQuery::new(
            Ident::new("users").unwrap(),
            Ident::new("tenant_id").unwrap(),
            DefaultValue::Reference {
                table: Ident::new("tenants").unwrap(),
                column: Ident::new("id").unwrap(),
                value: 1_i32.into(),
            },
        )
    }

    #[tokio::test]
    #[traced_test]
    async fn audit_lists_filled_keys() {
        let db = seeded().await;
        let history = HistoryIndex::new();
        let ctx = StepContext::new(StepConn::Direct(db.conn()), &history, 500);

        let outcome = backfill_missing(&ctx, &tenant_query()).await.unwrap();
        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(outcome.audited_keys, vec!["1".to_owned(), "3".to_owned()]);
        assert!(!outcome.truncated);
        assert!(logs_contain("backfilled rows"));
        assert!(logs_contain("keys=1,3"));
    }

    #[tokio::test]
    async fn audit_is_capped() {
        let db = seeded().await;
        let history = HistoryIndex::new();
        let ctx = StepContext::new(StepConn::Direct(db.conn()), &history, 1);

        let outcome = backfill_missing(&ctx, &tenant_query()).await.unwrap();
        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(outcome.audited_keys, vec!["1".to_owned()]);
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn literal_default_needs_no_reference_row() {
        let db = seeded().await;
        let history = HistoryIndex::new();
        let ctx = StepContext::new(StepConn::Direct(db.conn()), &history, 500);
        let query = BackfillQuery::new(
            Ident::new("users").unwrap(),
            Ident::new("tenant_id").unwrap(),
            DefaultValue::Literal(99_i32.into()),
        );

        let outcome = backfill_missing(&ctx, &query).await.unwrap();
        assert_eq!(outcome.rows_affected, 2);

        // nothing left to fill
        let again = backfill_missing(&ctx, &query).await.unwrap();
        assert_eq!(again.rows_affected, 0);
        assert!(again.audited_keys.is_empty());
    }

    #[tokio::test]
    async fn rows_with_null_keys_are_still_filled() {
        let db = DbHandle::connect("sqlite::memory:", ConnectOpts::default())
            .await
            .unwrap();
        for sql in [
            "CREATE TABLE tenants (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
            "INSERT INTO tenants (id, name) VALUES (1, 'Demo')",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT, tenant_id INTEGER NULL)",
            "INSERT INTO users (id, email, tenant_id) VALUES (1, NULL, NULL)",
        ] {
            db.conn().execute_unprepared(sql).await.unwrap();
        }
        let history = HistoryIndex::new();
        let ctx = StepContext::new(StepConn::Direct(db.conn()), &history, 500);
        let query = tenant_query().with_key_column(Ident::new("email").unwrap());

        let outcome = backfill_missing(&ctx, &query).await.unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert!(outcome.audited_keys.is_empty());
        let remaining = ctx
            .inspector()
            .count_null(&Ident::new("users").unwrap(), &Ident::new("tenant_id").unwrap())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn unbounded_audit_limit_is_capped() {
        let db = seeded().await;
        let history = HistoryIndex::new();
        let ctx = StepContext::new(StepConn::Direct(db.conn()), &history, usize::MAX);
        assert_eq!(ctx.audit_limit(), MAX_AUDIT_LIMIT);

        let outcome = backfill_missing(&ctx, &tenant_query()).await.unwrap();
        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(outcome.audited_keys, vec!["1".to_owned(), "3".to_owned()]);
        assert!(!outcome.truncated);
    }
}
