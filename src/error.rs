//! Error types for the finance assistant orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Failures of a single language model call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("language model timed out")]
    Timeout,

    #[error("language model rate limited")]
    RateLimited,

    #[error("invalid language model response: {0}")]
    InvalidResponse(String),

    #[error("language model unavailable: {0}")]
    Unavailable(String),
}

/// Failures of a single data query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query rejected, mutation verb '{0}' is not allowed")]
    MutationRejected(String),

    #[error("query timed out after {0} ms")]
    Timeout(u64),

    #[error("query could not be translated: {0}")]
    Translation(String),

    #[error("query backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Planning failure: {0}")]
    PlanningFailure(String),

    #[error("Language model and data executor both unavailable: {0}")]
    ServicesUnavailable(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Query error: {0}")]
    QueryError(#[from] QueryError),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
