//! Response composer
//!
//! Every lane ends here so the assistant keeps one voice. Composition never
//! fails: a model failure yields an apology and the structured payload is
//! still returned.

use crate::llm::{complete_before, LanguageModelClient, LlmRequest, PromptRole};
use crate::memory::ConversationContext;
use crate::models::{AnalysisReport, AnalysisStatus, StepResult, StepStatus};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Reply used whenever composition itself fails
pub const APOLOGY: &str =
    "I apologize, I encountered an error while preparing your answer. Please try again in a moment.";

/// What the chosen lane produced
#[derive(Debug, Clone, Copy)]
pub enum LaneOutcome<'a> {
    DirectData {
        instruction: &'a str,
        result: &'a StepResult,
    },
    Analysis(&'a AnalysisReport),
    Conversation {
        instruction: &'a str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub text: String,
    pub data: Option<Value>,
    /// True when the fallback reply was used
    pub degraded: bool,
}

pub struct ResponseComposer {
    llm: Arc<dyn LanguageModelClient>,
    assistant_name: String,
}

impl ResponseComposer {
    pub fn new(llm: Arc<dyn LanguageModelClient>, assistant_name: impl Into<String>) -> Self {
        Self {
            llm,
            assistant_name: assistant_name.into(),
        }
    }

    pub async fn compose(
        &self,
        message: &str,
        outcome: LaneOutcome<'_>,
        context: &ConversationContext,
        deadline: Instant,
    ) -> Composition {
        let data = data_payload(outcome);
        let request = LlmRequest::text(
            PromptRole::Composer,
            self.persona(context),
            build_prompt(message, outcome, context),
        );

        match complete_before(&self.llm, &request, deadline).await {
            Ok(response) => {
                let text = response.into_text().trim().to_string();
                if text.is_empty() {
                    warn!("Composer returned an empty reply");
                    return fallback(data);
                }
                info!(reply_chars = text.len(), has_data = data.is_some(), "Reply composed");
                Composition {
                    text,
                    data,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Composer failed, using fallback reply");
                fallback(data)
            }
        }
    }

    fn persona(&self, context: &ConversationContext) -> String {
        format!(
            r#"You are {name}, a friendly personal finance assistant talking to {user}.
Today is {date}.

Rules:
- Answer in plain conversational text. No markdown, tables or code blocks.
- Never reveal internal identifiers (budget, goal, transaction or user IDs), SQL, or how the system works internally.
- Use only the figures given to you. If something could not be retrieved or verified, say so plainly.
- Mention any budget warnings you are given, gently and briefly.
- Keep it short unless the user asked for detail."#,
            name = self.assistant_name,
            user = context.user_name,
            date = context.current_date,
        )
    }
}

fn fallback(data: Option<Value>) -> Composition {
    Composition {
        text: APOLOGY.to_string(),
        data,
        degraded: true,
    }
}

/// Structured payload for UI rendering; only present when rows exist
fn data_payload(outcome: LaneOutcome<'_>) -> Option<Value> {
    match outcome {
        LaneOutcome::DirectData { result, .. } => match &result.rows {
            Some(rows) if !rows.is_empty() => Some(Value::Array(rows.clone())),
            _ => None,
        },
        LaneOutcome::Analysis(report) => {
            let results: Vec<Value> = report
                .step_results
                .iter()
                .filter_map(|r| match &r.rows {
                    Some(rows) if !rows.is_empty() => Some(json!({
                        "query": r.description,
                        "rows": rows,
                    })),
                    _ => None,
                })
                .collect();
            if results.is_empty() {
                None
            } else {
                Some(json!({ "verified": report.verified, "results": results }))
            }
        }
        LaneOutcome::Conversation { .. } => None,
    }
}

fn build_prompt(message: &str, outcome: LaneOutcome<'_>, context: &ConversationContext) -> String {
    let mut prompt = format!(
        "CONVERSATION SO FAR:\n{}\n\nUSER MESSAGE:\n{}\n\n",
        context.history_summary(),
        message
    );

    match outcome {
        LaneOutcome::DirectData {
            instruction,
            result,
        } => {
            prompt.push_str(&format!("TASK:\n{}\n\n", instruction));
            match (result.status, &result.rows) {
                (StepStatus::Success, Some(rows)) if rows.is_empty() => {
                    prompt.push_str("DATA:\nThe query ran but found no matching records.\n")
                }
                (StepStatus::Success, Some(rows)) => prompt.push_str(&format!(
                    "DATA:\n{}\n",
                    serde_json::to_string_pretty(rows).unwrap_or_default()
                )),
                (StepStatus::Rejected, _) => prompt.push_str(
                    "DATA:\nThis request would change stored records, which cannot be done from here. Tell the user to make the change in the app.\n",
                ),
                _ => prompt.push_str(&format!(
                    "DATA:\nThe data could not be retrieved ({}).\n",
                    result.error.as_deref().unwrap_or("unknown error")
                )),
            }
        }
        LaneOutcome::Analysis(report) => {
            prompt.push_str(&format!("ANALYSIS:\n{}\n", report.explanation));
            if report.fallback_draft {
                prompt.push_str(
                    "The analysis above is a raw listing of the retrieved data; summarise it for the user.\n",
                );
            }
            match report.status {
                AnalysisStatus::Completed if report.verified => {
                    prompt.push_str("The analysis was checked against the data.\n")
                }
                _ => prompt.push_str(
                    "The analysis could not be fully verified against the data; present it as a best effort.\n",
                ),
            }
        }
        LaneOutcome::Conversation { instruction } => {
            prompt.push_str(&format!("TASK:\n{}\n", instruction));
            prompt.push_str(&format!("ACTIVE BUDGETS:\n{}\n", context.budgets_for_prompt()));
        }
    }

    let warnings = context.warning_messages();
    if !warnings.is_empty() {
        prompt.push_str("\nBUDGET WARNINGS:\n");
        for warning in warnings {
            prompt.push_str(&format!("- {}\n", warning));
        }
    }

    prompt
}
