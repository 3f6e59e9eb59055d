//! Language model capability
//!
//! Every stage that needs generated text talks to a `LanguageModelClient`.
//! Responses are tagged (`Text` vs `Structured`) and structured payloads are
//! parsed into typed outputs right at this boundary.

use crate::error::LlmError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

pub mod gemini;
pub use gemini::GeminiClient;

/// Which role a prompt plays; lets adapters and test doubles tell calls apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptRole {
    Router,
    Planner,
    Explainer,
    Auditor,
    Composer,
    SqlWriter,
}

/// Shape expected from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub role: PromptRole,
    pub system: String,
    pub user: String,
    pub format: ResponseFormat,
}

impl LlmRequest {
    pub fn text(role: PromptRole, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            role,
            system: system.into(),
            user: user.into(),
            format: ResponseFormat::Text,
        }
    }

    pub fn json(role: PromptRole, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            role,
            system: system.into(),
            user: user.into(),
            format: ResponseFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    Text(String),
    Structured(Value),
}

impl LlmResponse {
    /// Plain text view; structured payloads are rendered as JSON.
    pub fn into_text(self) -> String {
        match self {
            LlmResponse::Text(text) => text,
            LlmResponse::Structured(value) => value.to_string(),
        }
    }
}

/// Typed view of a structured response
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Valid(T),
    ParseFailure { raw: String, reason: String },
}

impl<T> Parsed<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Parsed::Valid(value) => Some(value),
            Parsed::ParseFailure { .. } => None,
        }
    }

    /// Turn a parse failure into `LlmError::InvalidResponse`.
    pub fn into_result(self) -> Result<T, LlmError> {
        match self {
            Parsed::Valid(value) => Ok(value),
            Parsed::ParseFailure { reason, .. } => Err(LlmError::InvalidResponse(reason)),
        }
    }
}

/// Generative model service
#[async_trait]
pub trait LanguageModelClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Validate a response against the schema of `T`.
///
/// Text responses are accepted when they contain JSON, optionally wrapped in a
/// markdown fence.
pub fn parse_structured<T: DeserializeOwned>(response: LlmResponse) -> Parsed<T> {
    let value = match response {
        LlmResponse::Structured(value) => value,
        LlmResponse::Text(text) => match serde_json::from_str::<Value>(strip_code_fence(&text)) {
            Ok(value) => value,
            Err(e) => {
                return Parsed::ParseFailure {
                    raw: text,
                    reason: format!("response is not JSON: {}", e),
                }
            }
        },
    };

    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => Parsed::Valid(parsed),
        Err(e) => Parsed::ParseFailure {
            raw: value.to_string(),
            reason: format!("response does not match schema: {}", e),
        },
    }
}

/// Remove a surrounding ```json ... ``` fence if present.
pub fn strip_code_fence(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Run a model call bounded by the turn deadline.
pub async fn complete_before(
    client: &Arc<dyn LanguageModelClient>,
    request: &LlmRequest,
    deadline: Instant,
) -> Result<LlmResponse, LlmError> {
    match tokio::time::timeout_at(deadline, client.complete(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(role = ?request.role, "Language model call exceeded the turn deadline");
            Err(LlmError::Timeout)
        }
    }
}

/// Call the model and parse the structured response in one go.
pub async fn complete_structured<T: DeserializeOwned>(
    client: &Arc<dyn LanguageModelClient>,
    request: &LlmRequest,
    deadline: Instant,
) -> Result<T, LlmError> {
    let response = complete_before(client, request, deadline).await?;
    parse_structured(response).into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        valid: bool,
    }

    #[test]
    fn test_parse_fenced_text() {
        let response = LlmResponse::Text("```json\n{\"valid\": true}\n```".to_string());
        assert_eq!(
            parse_structured::<Verdict>(response),
            Parsed::Valid(Verdict { valid: true })
        );
    }

    #[test]
    fn test_parse_schema_mismatch() {
        let response = LlmResponse::Structured(serde_json::json!({ "valid": "maybe" }));
        let parsed = parse_structured::<Verdict>(response);
        assert!(matches!(parsed, Parsed::ParseFailure { .. }));
        assert!(matches!(
            parsed.into_result(),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_non_json_text() {
        let response = LlmResponse::Text("I think it is valid".to_string());
        assert!(parse_structured::<Verdict>(response).ok().is_none());
    }
}
