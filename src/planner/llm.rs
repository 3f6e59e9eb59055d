//! Language-model planner

use super::{finalize_plan, PlanRequest, Planner};
use crate::error::OrchestrationError;
use crate::llm::{complete_structured, LanguageModelClient, LlmRequest, PromptRole};
use crate::models::PlannedStep;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

const PLANNER_PROMPT: &str = r#"You plan data retrieval for a personal finance analyst.
Break the goal into independent, read-only database questions.

Rules:
- At most {max_steps} steps. Aggregate where possible (totals, averages, grouped sums) instead of listing raw rows.
- Each step must be answerable by ONE read-only query against the user's own transactions, budgets and goals.
- Never ask to add, change or remove anything.
- Steps must not depend on each other's results.
- If feedback says the previous plan missed data, plan the missing data; do not repeat the same steps.

Respond ONLY with JSON: {"steps": ["...", "..."]}"#;

#[derive(Debug, Deserialize)]
struct PlanOutput {
    steps: Vec<StepSpec>,
}

/// Models sometimes return objects instead of plain strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepSpec {
    Text(String),
    Object { description: String },
}

impl StepSpec {
    fn into_description(self) -> String {
        match self {
            StepSpec::Text(text) => text,
            StepSpec::Object { description } => description,
        }
    }
}

pub struct LlmPlanner {
    llm: Arc<dyn LanguageModelClient>,
    max_steps: usize,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LanguageModelClient>, max_steps: usize) -> Self {
        Self { llm, max_steps }
    }

    fn build_prompt(&self, request: &PlanRequest<'_>) -> String {
        let mut prompt = format!(
            "GOAL:\n{}\n\nCONVERSATION:\n{}\n",
            request.goal, request.history
        );

        if let Some(needed) = request.data_request {
            prompt.push_str(&format!("\nDATA STILL NEEDED:\n{}\n", needed));
        }

        if !request.previous_steps.is_empty() {
            prompt.push_str("\nPREVIOUS STEPS:\n");
            for step in request.previous_steps {
                prompt.push_str(&format!("- {}\n", step.description));
            }
        }

        if !request.feedback.is_empty() {
            prompt.push_str("\nFEEDBACK ON THE LAST ANSWER:\n");
            for discrepancy in request.feedback {
                prompt.push_str(&format!("- {}\n", discrepancy));
            }
        }

        prompt
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn create_plan(
        &self,
        request: &PlanRequest<'_>,
        deadline: Instant,
    ) -> Result<Vec<PlannedStep>> {
        let system = PLANNER_PROMPT.replace("{max_steps}", &self.max_steps.to_string());
        let llm_request = LlmRequest::json(PromptRole::Planner, system, self.build_prompt(request));

        let output: PlanOutput = complete_structured(&self.llm, &llm_request, deadline)
            .await
            .map_err(|e| OrchestrationError::PlanningFailure(e.to_string()))?;

        debug!(raw_steps = output.steps.len(), "Planner responded");

        finalize_plan(
            output
                .steps
                .into_iter()
                .map(StepSpec::into_description)
                .collect(),
            self.max_steps,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::models::{Discrepancy, StepId};
    use crate::testing::ScriptedLlm;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn request<'a>(feedback: &'a [Discrepancy]) -> PlanRequest<'a> {
        PlanRequest {
            goal: "compare food spending this month vs last month",
            data_request: Some("prior month food total"),
            feedback,
            previous_steps: &[],
            history: "No previous messages in this conversation.",
        }
    }

    #[tokio::test]
    async fn test_plan_from_mixed_step_shapes() {
        let llm = Arc::new(ScriptedLlm::new().json(
            PromptRole::Planner,
            json!({ "steps": [
                "food total for the current month",
                { "description": "food total for the previous month" }
            ]}),
        ));
        let planner = LlmPlanner::new(llm.clone(), 4);
        let feedback = vec![Discrepancy::new("auditor", "missing prior month")];

        let plan = assert_ok!(
            planner
                .create_plan(&request(&feedback), Instant::now() + Duration::from_secs(5))
                .await
        );

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].step_id, StepId(2));

        let prompt = &llm.requests_for(PromptRole::Planner)[0];
        assert!(prompt.system.contains("At most 4 steps"));
        assert!(prompt.user.contains("auditor: missing prior month"));
        assert!(prompt.user.contains("DATA STILL NEEDED"));
    }

    #[tokio::test]
    async fn test_model_failure_is_planning_failure() {
        let planner = LlmPlanner::new(
            Arc::new(ScriptedLlm::new().fail(PromptRole::Planner, LlmError::RateLimited)),
            4,
        );

        let error = assert_err!(
            planner
                .create_plan(&request(&[]), Instant::now() + Duration::from_secs(5))
                .await
        );

        assert!(matches!(error, OrchestrationError::PlanningFailure(_)));
    }
}
