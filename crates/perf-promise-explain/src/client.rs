//! Database probe traits.
//!
//! The enforcer never runs application queries itself. It only needs two
//! things from the connection serving the request: the plan of a select, and
//! the row count of a table. Both are expressed as minimal traits here so any
//! driver can plug in; implementations for `tokio-postgres` are provided.

use crate::backend::Backend;
use crate::error::{ExplainError, ExplainResult};
use crate::plan::PlanInfo;
use serde_json::Value;
use tokio_postgres::Row;

/// A connection that can explain statements.
#[async_trait::async_trait]
pub trait ExplainClient: Sync {
    /// The backend behind this connection.
    fn backend(&self) -> Backend;

    /// Run the backend's explain probe for `sql` and return the raw payload.
    async fn explain(&self, sql: &str) -> ExplainResult<Value>;

    /// Explain `sql` and classify the result.
    async fn plan(&self, sql: &str) -> ExplainResult<PlanInfo> {
        let raw = self.explain(sql).await?;
        Ok(self.backend().classify(raw))
    }
}

/// A connection that can count the rows of a table.
#[async_trait::async_trait]
pub trait RowCounter: Sync {
    /// Return `SELECT COUNT(*)` for `table`.
    async fn count(&self, table: &str) -> ExplainResult<i64>;
}

/// Quote a possibly schema-qualified table name (`public.users`).
pub fn quote_table(table: &str) -> ExplainResult<String> {
    if table.is_empty() || table.contains('\0') {
        return Err(ExplainError::InvalidIdentifier(table.to_string()));
    }
    let mut quoted = Vec::new();
    for part in table.split('.') {
        if part.is_empty() {
            return Err(ExplainError::InvalidIdentifier(table.to_string()));
        }
        quoted.push(format!("\"{}\"", part.replace('"', "\"\"")));
    }
    Ok(quoted.join("."))
}

/// Postgres cannot plan `$n` placeholders without values unless asked for a
/// generic plan (PostgreSQL 16+).
fn postgres_explain_statement(sql: &str) -> String {
    let has_placeholder = sql
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'$' && w[1].is_ascii_digit());
    if has_placeholder {
        format!("EXPLAIN (FORMAT JSON, GENERIC_PLAN) {sql}")
    } else {
        Backend::Postgres.explain_statement(sql)
    }
}

fn decode_plan(row: &Row) -> ExplainResult<Value> {
    match row.try_get::<_, Value>(0) {
        Ok(value) => Ok(value),
        Err(_) => {
            let text: String = row
                .try_get(0)
                .map_err(|e| ExplainError::decode("QUERY PLAN", e.to_string()))?;
            serde_json::from_str(&text)
                .map_err(|e| ExplainError::decode("QUERY PLAN", e.to_string()))
        }
    }
}

fn decode_count(row: &Row) -> ExplainResult<i64> {
    row.try_get(0)
        .map_err(|e| ExplainError::decode("count", e.to_string()))
}

#[async_trait::async_trait]
impl ExplainClient for tokio_postgres::Client {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn explain(&self, sql: &str) -> ExplainResult<Value> {
        let row = self.query_one(&postgres_explain_statement(sql), &[]).await?;
        decode_plan(&row)
    }
}

#[async_trait::async_trait]
impl<'a> ExplainClient for tokio_postgres::Transaction<'a> {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn explain(&self, sql: &str) -> ExplainResult<Value> {
        let row = self.query_one(&postgres_explain_statement(sql), &[]).await?;
        decode_plan(&row)
    }
}

#[async_trait::async_trait]
impl RowCounter for tokio_postgres::Client {
    async fn count(&self, table: &str) -> ExplainResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_table(table)?);
        let row = self.query_one(&sql, &[]).await?;
        decode_count(&row)
    }
}

#[async_trait::async_trait]
impl<'a> RowCounter for tokio_postgres::Transaction<'a> {
    async fn count(&self, table: &str) -> ExplainResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_table(table)?);
        let row = self.query_one(&sql, &[]).await?;
        decode_count(&row)
    }
}
