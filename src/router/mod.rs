//! Top-level router
//!
//! Picks exactly one lane per turn. Any failure of the routing model falls
//! back to the conversational lane; the data lanes are never chosen on a
//! guess.

pub mod budget;

use crate::classifier::MessageClassifier;
use crate::data::BudgetDirectory;
use crate::llm::{complete_structured, LanguageModelClient, LlmRequest, PromptRole};
use crate::memory::ConversationContext;
use crate::models::{Lane, RoutingDecision};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const ROUTER_PROMPT: &str = r#"You are the router of a personal finance assistant.
Pick exactly one lane for the user's latest message:
- "direct_data": the user wants specific records or totals that one database query answers (balances, transactions, budget status, goals).
- "deep_analysis": the user wants trends, comparisons, spending behaviour or advice that needs several queries and reasoning.
- "conversational": greetings, general finance questions, small talk or anything else.

Write "instruction" as a short, explicit instruction for the chosen lane.
Respond ONLY with JSON: {"lane": "...", "instruction": "...", "rationale": "..."}"#;

#[derive(Debug, Deserialize)]
struct RouterOutput {
    lane: String,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    rationale: String,
}

pub struct TopRouter {
    llm: Arc<dyn LanguageModelClient>,
    budgets: Arc<dyn BudgetDirectory>,
}

impl TopRouter {
    pub fn new(llm: Arc<dyn LanguageModelClient>, budgets: Arc<dyn BudgetDirectory>) -> Self {
        Self { llm, budgets }
    }

    /// Decide the lane for `message`.
    ///
    /// Loads the active budgets into `context` and, for the direct data
    /// lane, runs the advisory budget pre-check.
    pub async fn decide(
        &self,
        message: &str,
        context: &mut ConversationContext,
        deadline: Instant,
    ) -> RoutingDecision {
        self.load_budgets(context, deadline).await;

        let request = LlmRequest::json(
            PromptRole::Router,
            ROUTER_PROMPT,
            build_routing_prompt(message, context),
        );

        let decision = match complete_structured::<RouterOutput>(&self.llm, &request, deadline).await {
            Ok(output) => match Lane::from_label(&output.lane) {
                Some(lane) => RoutingDecision {
                    lane,
                    rationale: output.rationale,
                    instruction: if output.instruction.trim().is_empty() {
                        message.to_string()
                    } else {
                        output.instruction
                    },
                },
                None => {
                    warn!(lane = %output.lane, "Router returned an unknown lane");
                    RoutingDecision::conversational_fallback(format!(
                        "unknown lane '{}'",
                        output.lane
                    ))
                }
            },
            Err(e) => {
                warn!(error = %e, "Routing model failed, falling back to conversation");
                RoutingDecision::conversational_fallback(format!("routing failed: {}", e))
            }
        };

        if decision.lane == Lane::DirectData {
            run_budget_check(message, context);
        }

        info!(lane = %decision.lane, rationale = %decision.rationale, "Routing decision");
        decision
    }

    async fn load_budgets(&self, context: &mut ConversationContext, deadline: Instant) {
        let lookup = self.budgets.active_budgets(context.user_id());
        match tokio::time::timeout_at(deadline, lookup).await {
            Ok(Ok(budgets)) => {
                debug!(count = budgets.len(), "Loaded active budgets");
                context.active_budgets = budgets;
            }
            Ok(Err(e)) => warn!(error = %e, "Budget lookup failed, skipping pre-check"),
            Err(_) => warn!("Budget lookup exceeded the turn deadline"),
        }
    }
}

fn build_routing_prompt(message: &str, context: &ConversationContext) -> String {
    let budgets = context
        .active_budgets
        .iter()
        .map(|b| format!("{} (ID: {})", b.name, b.budget_id))
        .collect::<Vec<_>>();
    let budgets = if budgets.is_empty() {
        "none".to_string()
    } else {
        budgets.join(", ")
    };

    format!(
        "Today: {}\nActive budgets: {}\n\nConversation so far:\n{}\n\nUser message: {}",
        context.current_date,
        budgets,
        context.history_summary(),
        message
    )
}

fn run_budget_check(message: &str, context: &mut ConversationContext) {
    let signals = MessageClassifier::classify(message);
    if !signals.needs_budget_check() || context.active_budgets.is_empty() {
        return;
    }

    let outcome = budget::check(&signals, &context.active_budgets);
    for warning in &outcome.warnings {
        warn!(category = %warning.category, amount = warning.amount, "Budget pre-check warning");
    }

    context.resolved_categories = outcome.resolved;
    context.warnings.extend(outcome.warnings);
}
