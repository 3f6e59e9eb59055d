//! Per-turn conversation context
//!
//! Holds everything the router, the analysis workflow and the composer need
//! to know about the turn in flight. Owned by exactly one `handle` call.

use super::store::{Conversation, Turn};
use crate::models::{AgentKind, BudgetCategory, BudgetWarning};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A free-text category mention resolved to an active budget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedCategory {
    pub mention: String,
    pub budget: BudgetCategory,
}

/// Short record of what a lane produced during this turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubResult {
    pub agent: AgentKind,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation: Conversation,
    pub user_name: String,
    pub current_date: NaiveDate,
    pub active_budgets: Vec<BudgetCategory>,
    pub resolved_categories: Vec<ResolvedCategory>,
    pub warnings: Vec<BudgetWarning>,
    pub sub_results: Vec<SubResult>,
    history_depth: usize,
}

impl ConversationContext {
    pub fn new(conversation: Conversation, user_name: impl Into<String>) -> Self {
        Self {
            conversation,
            user_name: user_name.into(),
            current_date: Utc::now().date_naive(),
            active_budgets: Vec::new(),
            resolved_categories: Vec::new(),
            warnings: Vec::new(),
            sub_results: Vec::new(),
            history_depth: 20,
        }
    }

    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = depth;
        self
    }

    pub fn with_current_date(mut self, date: NaiveDate) -> Self {
        self.current_date = date;
        self
    }

    pub fn user_id(&self) -> i64 {
        self.conversation.user_id
    }

    /// Recent history rendered for prompts
    pub fn history_summary(&self) -> String {
        self.conversation.summary(self.history_depth)
    }

    /// Reset the per-turn state before a new message is handled.
    pub fn begin_turn(&mut self) {
        self.current_date = Utc::now().date_naive();
        self.active_budgets.clear();
        self.resolved_categories.clear();
        self.warnings.clear();
        self.sub_results.clear();
    }

    pub fn record_sub_result(&mut self, agent: AgentKind, summary: impl Into<String>) {
        self.sub_results.push(SubResult {
            agent,
            summary: summary.into(),
        });
    }

    /// Append the finished turn to the conversation.
    pub fn record_turn(&mut self, turn: Turn) {
        self.conversation.append(turn);
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.message.clone()).collect()
    }

    /// Active budgets as `name (limit, spent)` for prompts
    pub fn budgets_for_prompt(&self) -> String {
        if self.active_budgets.is_empty() {
            return "No active budgets found.".to_string();
        }

        self.active_budgets
            .iter()
            .map(|b| {
                format!(
                    "{} (monthly limit {:.2}, spent this month {:.2})",
                    b.name, b.monthly_limit, b.spent_this_month
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Lane;
    use crate::testing::budget;

    #[test]
    fn test_begin_turn_clears_turn_state() {
        let mut context = ConversationContext::new(Conversation::new(7), "Mona");
        context.active_budgets.push(budget("Food", 1000.0, 820.0));
        context.record_sub_result(AgentKind::DatabaseAgent, "2 rows");

        context.begin_turn();

        assert!(context.active_budgets.is_empty());
        assert!(context.sub_results.is_empty());
    }

    #[test]
    fn test_record_turn_feeds_history() {
        let mut context =
            ConversationContext::new(Conversation::new(7), "Mona").with_history_depth(5);
        context.record_turn(Turn::new(
            "hi",
            "Hello Mona!",
            Lane::Conversational,
            vec![AgentKind::PersonalAssistant],
        ));

        assert!(context.history_summary().contains("Assistant: Hello Mona!"));
    }

    #[test]
    fn test_budgets_for_prompt() {
        let mut context = ConversationContext::new(Conversation::new(7), "Mona");
        assert_eq!(context.budgets_for_prompt(), "No active budgets found.");

        context.active_budgets.push(budget("Food", 1000.0, 820.0));
        assert_eq!(
            context.budgets_for_prompt(),
            "Food (monthly limit 1000.00, spent this month 820.00)"
        );
    }
}
