//! Planner trait and plan clean-up
//!
//! The planner uses the language model to decompose an analytic goal into
//! independent read-only queries. Whatever it returns is cleaned here before
//! the workflow sees it.

use crate::data::find_mutation_verb;
use crate::error::OrchestrationError;
use crate::models::{Discrepancy, PlannedStep, StepId};
use crate::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

pub mod llm;
pub use llm::LlmPlanner;

/// Everything the planner may look at
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub goal: &'a str,
    /// Data the last explanation said it was missing
    pub data_request: Option<&'a str>,
    /// Problems found in the last draft
    pub feedback: &'a [Discrepancy],
    /// Steps of the plan being replaced, if any
    pub previous_steps: &'a [PlannedStep],
    pub history: &'a str,
}

/// Trait for plan generation (LLM controlled)
#[async_trait]
pub trait Planner: Send + Sync {
    /// Decompose the goal into ordered query steps numbered from 1.
    async fn create_plan(
        &self,
        request: &PlanRequest<'_>,
        deadline: Instant,
    ) -> Result<Vec<PlannedStep>>;
}

/// Turn raw step descriptions into a usable plan: blanks, duplicates and
/// anything that reads like a write are dropped, the rest is capped at
/// `max_steps` and numbered.
pub fn finalize_plan(descriptions: Vec<String>, max_steps: usize) -> Result<Vec<PlannedStep>> {
    let mut kept: Vec<String> = Vec::new();

    for description in descriptions {
        let description = description.trim().to_string();
        if description.is_empty() {
            continue;
        }
        if let Some(verb) = find_mutation_verb(&description) {
            warn!(verb = verb, step = %description, "Dropping mutating step from plan");
            continue;
        }
        if kept.iter().any(|k| k.eq_ignore_ascii_case(&description)) {
            continue;
        }
        kept.push(description);
    }

    if kept.len() > max_steps {
        warn!(planned = kept.len(), max_steps, "Plan truncated");
        kept.truncate(max_steps);
    }

    if kept.is_empty() {
        return Err(OrchestrationError::PlanningFailure(
            "planner produced no usable read-only steps".to_string(),
        ));
    }

    Ok(kept
        .into_iter()
        .enumerate()
        .map(|(i, description)| PlannedStep {
            step_id: StepId(i as u32 + 1),
            description,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_drops_writes_and_duplicates() {
        let plan = finalize_plan(
            vec![
                "Food total for the current month".to_string(),
                "  ".to_string(),
                "Delete old transactions".to_string(),
                "food total for the current month".to_string(),
                "Food total for the previous month".to_string(),
            ],
            4,
        )
        .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].step_id, StepId(1));
        assert_eq!(plan[1].description, "Food total for the previous month");
    }

    #[test]
    fn test_finalize_caps_steps() {
        let descriptions = (1..=6).map(|i| format!("query {}", i)).collect();
        let plan = finalize_plan(descriptions, 4).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[3].step_id, StepId(4));
    }

    #[test]
    fn test_finalize_rejects_empty_plan() {
        let result = finalize_plan(vec!["update budget limits".to_string()], 4);
        assert!(matches!(result, Err(OrchestrationError::PlanningFailure(_))));
    }
}
