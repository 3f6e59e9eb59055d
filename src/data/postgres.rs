//! Postgres-backed data capabilities
//!
//! `PgQueryExecutor` turns a plain-language query description into a single
//! SELECT with the help of the language model, then runs it inside a
//! read-only transaction. `PgBudgetDirectory` lists active budgets.

use super::{ensure_read_only, BudgetDirectory, DataQueryExecutor};
use crate::error::QueryError;
use crate::llm::{parse_structured, LanguageModelClient, LlmRequest, PromptRole};
use crate::models::{BudgetCategory, QueryDescription, Rows};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SQL_WRITER_PROMPT: &str = r#"You are a read-only database agent. Translate the request into a single PostgreSQL SELECT query.

OUTPUT: {"query": "<SQL>", "message": "<TEXT>"}
- "query": empty string if the request cannot be answered read-only.
- "message": brief confirmation or the reason the request was refused.

RULES:
1. STRICT READ-ONLY: never INSERT, UPDATE, DELETE, DROP or change schema.
2. Always filter by the given user_id.
3. Use column names, not indices. Round numerics to 2 decimals.
4. Never select internal ids (id, budget_id, user_id); prefer human-readable columns.
5. Budget limits are per month: compare them against monthly aggregates only.

SCHEMA:
transactions(transaction_id, date, amount, time, store_name, city, type_spending, user_id, budget_id, neighbourhood, created_at)
budget(budget_id, user_id, budget_name, description, total_limit, priority_level_int, is_active, created_at, updated_at)
goals(goal_id, user_id, goal_name, description, target, start_date, due_date, status, plan, created_at, updated_at)
income(income_id, user_id, amount, source, date, created_at)
"#;

#[derive(Debug, Deserialize)]
struct SqlWriterOutput {
    #[serde(default)]
    query: String,
    #[serde(default)]
    message: String,
}

/// Build a lazily-connecting pool, as the rest of the data layer does.
pub fn connect_lazy(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(database_url)?;
    info!("Postgres pool configured");
    Ok(pool)
}

pub struct PgQueryExecutor {
    pool: PgPool,
    llm: Arc<dyn LanguageModelClient>,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool, llm: Arc<dyn LanguageModelClient>) -> Self {
        Self { pool, llm }
    }

    /// Ask the model for SQL. Runs under the caller's step timeout, which
    /// cancels the whole query including this call.
    async fn translate(&self, query: &QueryDescription) -> std::result::Result<String, QueryError> {
        let request = LlmRequest::json(
            PromptRole::SqlWriter,
            SQL_WRITER_PROMPT,
            format!("request: {}\nuser_id: {}", query.text, query.user_id),
        );
        let output: SqlWriterOutput = self
            .llm
            .complete(&request)
            .await
            .and_then(|response| parse_structured(response).into_result())
            .map_err(|e| QueryError::Translation(e.to_string()))?;

        let sql = output.query.trim().trim_end_matches(';').trim().to_string();
        if sql.is_empty() {
            return Err(QueryError::Translation(if output.message.is_empty() {
                "no query produced".to_string()
            } else {
                output.message
            }));
        }

        validate_select(&sql)?;
        Ok(sql)
    }

    async fn run_read_only(&self, sql: &str) -> std::result::Result<Rows, QueryError> {
        let backend = |e: sqlx::Error| QueryError::Backend(e.to_string());

        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let wrapped = format!(
            "SELECT COALESCE(json_agg(t), '[]'::json) AS rows FROM ({}) AS t",
            sql
        );
        let row = sqlx::query(&wrapped)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
        let value: Value = row.try_get("rows").map_err(backend)?;

        tx.rollback().await.map_err(backend)?;

        match value {
            Value::Array(rows) => Ok(rows),
            other => Ok(vec![other]),
        }
    }
}

/// Only a single SELECT (or WITH ... SELECT) statement is accepted.
fn validate_select(sql: &str) -> std::result::Result<(), QueryError> {
    ensure_read_only(sql)?;

    let lowered = sql.trim_start().to_lowercase();
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(QueryError::Translation(
            "only SELECT statements are executed".to_string(),
        ));
    }
    if sql.contains(';') {
        return Err(QueryError::Translation(
            "multiple statements are not allowed".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl DataQueryExecutor for PgQueryExecutor {
    async fn execute(&self, query: &QueryDescription) -> std::result::Result<Rows, QueryError> {
        ensure_read_only(&query.text)?;

        let sql = self.translate(query).await?;
        debug!(user_id = query.user_id, %sql, "Running read-only query");

        let rows = self.run_read_only(&sql).await?;
        debug!(row_count = rows.len(), "Query finished");
        Ok(rows)
    }
}

pub struct PgBudgetDirectory {
    pool: PgPool,
}

impl PgBudgetDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BudgetDirectory for PgBudgetDirectory {
    async fn active_budgets(&self, user_id: i64) -> Result<Vec<BudgetCategory>> {
        let rows = sqlx::query(
            r#"
            SELECT b.budget_id::int8 AS budget_id,
                   b.budget_name,
                   COALESCE(b.total_limit, 0)::float8 AS total_limit,
                   COALESCE(b.priority_level_int, 0)::int2 AS priority,
                   COALESCE((
                       SELECT SUM(t.amount)
                       FROM transactions t
                       WHERE t.budget_id = b.budget_id
                         AND t.user_id = b.user_id
                         AND DATE_TRUNC('month', t.date) = DATE_TRUNC('month', CURRENT_DATE)
                   ), 0)::float8 AS spent_this_month
            FROM budget b
            WHERE b.user_id = $1 AND b.is_active
            ORDER BY b.priority_level_int DESC NULLS LAST
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut budgets = Vec::with_capacity(rows.len());
        for row in rows {
            let budget = BudgetCategory {
                budget_id: row.try_get("budget_id")?,
                name: row.try_get("budget_name")?,
                monthly_limit: row.try_get("total_limit")?,
                spent_this_month: row.try_get("spent_this_month")?,
                priority: row.try_get("priority")?,
            };
            budgets.push(budget);
        }

        if budgets.is_empty() {
            warn!(user_id, "No active budgets found");
        }

        Ok(budgets)
    }
}
