//! Data access capabilities
//!
//! The core never holds a raw connection. It sees the data layer through
//! narrow read-only traits, one per domain.

use crate::error::QueryError;
use crate::models::{BudgetCategory, QueryDescription, Rows};
use crate::Result;
use async_trait::async_trait;

pub mod postgres;
pub use postgres::{PgBudgetDirectory, PgQueryExecutor};

/// Verbs that make a query description (or SQL statement) a write.
const MUTATION_VERBS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "create", "grant", "revoke",
    "merge", "upsert", "replace", "copy", "vacuum", "reindex", "comment",
];

/// Executes one read-only query description
#[async_trait]
pub trait DataQueryExecutor: Send + Sync {
    async fn execute(&self, query: &QueryDescription) -> std::result::Result<Rows, QueryError>;
}

/// Read access to the caller's active budget categories
#[async_trait]
pub trait BudgetDirectory: Send + Sync {
    async fn active_budgets(&self, user_id: i64) -> Result<Vec<BudgetCategory>>;
}

/// Return the first mutation verb found in `text`, matched on whole words so
/// identifiers such as `created_at` do not count.
pub fn find_mutation_verb(text: &str) -> Option<&'static str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            let lowered = word.to_lowercase();
            MUTATION_VERBS.iter().copied().find(|verb| *verb == lowered)
        })
}

/// Refuse anything that reads like a write.
pub fn ensure_read_only(text: &str) -> std::result::Result<(), QueryError> {
    match find_mutation_verb(text) {
        Some(verb) => Err(QueryError::MutationRejected(verb.to_string())),
        None => Ok(()),
    }
}
