//! Explanation drafting
//!
//! Turns raw query results into a narrative answer. Revisions receive the
//! previous draft and the itemized discrepancies so corrections are targeted.

use crate::llm::{complete_structured, LanguageModelClient, LlmRequest, PromptRole};
use crate::models::{Discrepancy, StepId, StepResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

const EXPLAINER_PROMPT: &str = r#"You are a personal finance analyst.
Explain what the query results say about the user's question.

Rules:
- Use only figures that appear in the results or follow from them by simple arithmetic.
- State the direction of every change correctly (more / less, up / down).
- Mention results that failed or came back empty instead of guessing.
- If a correction list is given, fix every listed problem and keep the rest of the previous draft.
- If answering needs data that is not in the results, describe it in "data_request"; otherwise leave it null.

Respond ONLY with JSON: {"explanation": "...", "data_request": null}"#;

#[derive(Debug, Deserialize)]
struct ExplainerOutput {
    explanation: String,
    #[serde(default)]
    data_request: Option<String>,
}

/// Inputs for one drafting call
#[derive(Debug, Clone, Copy)]
pub struct ExplainRequest<'a> {
    pub goal: &'a str,
    pub results: &'a BTreeMap<StepId, StepResult>,
    pub previous_draft: Option<&'a str>,
    pub discrepancies: &'a [Discrepancy],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub text: String,
    /// Data the draft says it still needs
    pub data_request: Option<String>,
    /// True when the model failed and a fallback text was used
    pub degraded: bool,
}

pub struct Explainer {
    llm: Arc<dyn LanguageModelClient>,
}

impl Explainer {
    pub fn new(llm: Arc<dyn LanguageModelClient>) -> Self {
        Self { llm }
    }

    /// Draft or revise. Never fails: a model failure keeps the previous
    /// draft, or falls back to a literal transcription of the results.
    pub async fn explain(&self, request: &ExplainRequest<'_>, deadline: Instant) -> Explanation {
        let llm_request = LlmRequest::json(
            PromptRole::Explainer,
            EXPLAINER_PROMPT,
            build_prompt(request),
        );

        match complete_structured::<ExplainerOutput>(&self.llm, &llm_request, deadline).await {
            Ok(output) if !output.explanation.trim().is_empty() => {
                debug!(revision = request.previous_draft.is_some(), "Draft produced");
                Explanation {
                    text: output.explanation.trim().to_string(),
                    data_request: output
                        .data_request
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty()),
                    degraded: false,
                }
            }
            Ok(_) => {
                warn!("Explainer returned an empty draft");
                fallback(request)
            }
            Err(e) => {
                warn!(error = %e, "Explainer failed");
                fallback(request)
            }
        }
    }
}

fn fallback(request: &ExplainRequest<'_>) -> Explanation {
    let text = match request.previous_draft {
        Some(draft) if !draft.trim().is_empty() => draft.to_string(),
        _ => transcribe(request.results),
    };

    Explanation {
        text,
        data_request: None,
        degraded: true,
    }
}

/// Plain listing of every result, one line per step
pub fn transcribe(results: &BTreeMap<StepId, StepResult>) -> String {
    if results.is_empty() {
        return "No data was retrieved for this question.".to_string();
    }

    let mut lines = vec!["Here is the data I retrieved:".to_string()];
    for result in results.values() {
        let line = match (&result.rows, &result.error) {
            (Some(rows), _) if rows.is_empty() => format!("- {}: no matching records", result.description),
            (Some(rows), _) => format!(
                "- {}: {}",
                result.description,
                serde_json::to_string(rows).unwrap_or_default()
            ),
            (None, Some(error)) => format!("- {}: unavailable ({})", result.description, error),
            (None, None) => format!("- {}: unavailable", result.description),
        };
        lines.push(line);
    }
    lines.join("\n")
}

fn build_prompt(request: &ExplainRequest<'_>) -> String {
    let results: Vec<_> = request.results.values().collect();
    let mut prompt = format!(
        "QUESTION:\n{}\n\nRESULTS:\n{}\n",
        request.goal,
        serde_json::to_string_pretty(&results).unwrap_or_default()
    );

    if let Some(draft) = request.previous_draft {
        prompt.push_str(&format!("\nPREVIOUS DRAFT:\n{}\n", draft));
    }

    if !request.discrepancies.is_empty() {
        prompt.push_str("\nCORRECTIONS REQUIRED:\n");
        for discrepancy in request.discrepancies {
            prompt.push_str(&format!("- {}\n", discrepancy));
        }
    }

    prompt
}
