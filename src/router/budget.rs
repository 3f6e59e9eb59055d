//! Advisory budget pre-check
//!
//! Resolves free-text category mentions against the caller's active budgets
//! and warns about amounts that would exceed the remaining monthly headroom.
//! Never blocks a turn.

use crate::classifier::MessageSignals;
use crate::memory::ResolvedCategory;
use crate::models::{BudgetCategory, BudgetWarning};

#[derive(Debug, Default)]
pub struct BudgetCheck {
    pub resolved: Vec<ResolvedCategory>,
    pub warnings: Vec<BudgetWarning>,
}

/// Resolve a mention: exact name, then containment either way, then the
/// budget sharing the most words with the mention.
pub fn resolve_category<'a>(
    mention: &str,
    budgets: &'a [BudgetCategory],
) -> Option<&'a BudgetCategory> {
    let mention = mention.trim().to_lowercase();
    if mention.is_empty() {
        return None;
    }

    if let Some(exact) = budgets.iter().find(|b| b.name.to_lowercase() == mention) {
        return Some(exact);
    }

    if let Some(contained) = budgets.iter().find(|b| {
        let name = b.name.to_lowercase();
        name.contains(&mention) || mention.contains(&name)
    }) {
        return Some(contained);
    }

    let mention_words: Vec<&str> = mention.split_whitespace().collect();
    budgets
        .iter()
        .map(|b| {
            let name = b.name.to_lowercase();
            let overlap = name
                .split_whitespace()
                .filter(|w| w.len() > 2 && mention_words.contains(w))
                .count();
            (overlap, b)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .max_by_key(|(overlap, b)| (*overlap, b.priority))
        .map(|(_, b)| b)
}

/// Run the pre-check for one message.
pub fn check(signals: &MessageSignals, budgets: &[BudgetCategory]) -> BudgetCheck {
    let mut result = BudgetCheck::default();

    for mention in &signals.category_mentions {
        if let Some(budget) = resolve_category(mention, budgets) {
            if result.resolved.iter().any(|r| r.budget.budget_id == budget.budget_id) {
                continue;
            }
            result.resolved.push(ResolvedCategory {
                mention: mention.clone(),
                budget: budget.clone(),
            });
        }
    }

    if !signals.write_intent {
        return result;
    }

    // The first amount in a write is the one being recorded
    let Some(amount) = signals.amounts.first().copied() else {
        return result;
    };

    for resolved in &result.resolved {
        let remaining = resolved.budget.remaining();
        if amount > remaining {
            result.warnings.push(BudgetWarning {
                category: resolved.budget.name.clone(),
                amount,
                remaining,
                message: format!(
                    "{:.2} would exceed the remaining {:.2} of the {} budget this month",
                    amount,
                    remaining.max(0.0),
                    resolved.budget.name
                ),
            });
        }
    }

    result
}
