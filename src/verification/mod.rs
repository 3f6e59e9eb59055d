//! Verification of draft explanations
//!
//! Blocking rules run first and reject structurally broken drafts outright.
//! Advisory rules only annotate: their findings go to the auditor model,
//! which makes the final call.

use crate::llm::{complete_structured, LanguageModelClient, LlmRequest, PromptRole};
use crate::models::{Discrepancy, StepId, StepResult, ValidationVerdict};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Source name used for discrepancies raised by the auditor model
pub const AUDITOR: &str = "auditor";

/// Trait for deterministic verification rules
pub trait VerificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Blocking rules veto the draft without consulting the auditor
    fn is_blocking(&self) -> bool {
        true
    }

    fn verify(
        &self,
        goal: &str,
        draft: &str,
        results: &BTreeMap<StepId, StepResult>,
    ) -> VerificationCheckResult;
}

pub struct VerificationCheckResult {
    pub passed: bool,
    pub details: String,
}

/// Verdict plus whether it came from a complete check
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub verdict: ValidationVerdict,
    /// False when the auditor could not be reached
    pub conclusive: bool,
}

/// Verification engine that enforces rules and consults the auditor
pub struct VerificationEngine {
    rules: Vec<Box<dyn VerificationRule>>,
    auditor: Arc<dyn LanguageModelClient>,
}

impl VerificationEngine {
    pub fn new(auditor: Arc<dyn LanguageModelClient>) -> Self {
        Self {
            rules: Vec::new(),
            auditor,
        }
    }

    pub fn add_rule(&mut self, rule: Box<dyn VerificationRule>) {
        self.rules.push(rule);
    }

    /// Check a draft against the results it describes.
    pub async fn verify(
        &self,
        goal: &str,
        draft: &str,
        results: &BTreeMap<StepId, StepResult>,
        deadline: Instant,
    ) -> VerificationOutcome {
        let mut blocking = Vec::new();
        let mut advisory = Vec::new();

        for rule in &self.rules {
            let result = rule.verify(goal, draft, results);
            if result.passed {
                continue;
            }
            let discrepancy = Discrepancy::new(rule.name(), result.details);
            if rule.is_blocking() {
                blocking.push(discrepancy);
            } else {
                advisory.push(discrepancy);
            }
        }

        if !blocking.is_empty() {
            info!(
                rule_count = self.rules.len(),
                failed = blocking.len(),
                "Draft failed blocking checks"
            );
            return VerificationOutcome {
                verdict: ValidationVerdict::Invalid {
                    discrepancies: blocking,
                },
                conclusive: true,
            };
        }

        let outcome = self.audit(goal, draft, results, advisory, deadline).await;

        info!(
            rule_count = self.rules.len(),
            verified = outcome.verdict.is_valid(),
            conclusive = outcome.conclusive,
            "Verification completed"
        );

        outcome
    }

    async fn audit(
        &self,
        goal: &str,
        draft: &str,
        results: &BTreeMap<StepId, StepResult>,
        notes: Vec<Discrepancy>,
        deadline: Instant,
    ) -> VerificationOutcome {
        let results: Vec<_> = results.values().collect();
        let mut prompt = format!(
            "QUESTION:\n{}\n\nRESULTS:\n{}\n\nDRAFT:\n{}\n",
            goal,
            serde_json::to_string_pretty(&results).unwrap_or_default(),
            draft
        );
        if !notes.is_empty() {
            prompt.push_str("\nAUTOMATIC CHECK NOTES:\n");
            for note in &notes {
                prompt.push_str(&format!("- {}\n", note));
            }
        }
        let request = LlmRequest::json(PromptRole::Auditor, AUDITOR_PROMPT, prompt);

        match complete_structured::<AuditorOutput>(&self.auditor, &request, deadline).await {
            Ok(output) if output.valid => {
                if !notes.is_empty() {
                    debug!(notes = notes.len(), "Auditor accepted figures the automatic check could not trace");
                }
                VerificationOutcome {
                    verdict: ValidationVerdict::Valid,
                    conclusive: true,
                }
            }
            Ok(output) => {
                let mut discrepancies: Vec<Discrepancy> = output
                    .discrepancies
                    .into_iter()
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .map(|d| Discrepancy::new(AUDITOR, d))
                    .collect();

                if discrepancies.is_empty() {
                    let reason = output
                        .reasoning
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| "draft is not supported by the results".to_string());
                    discrepancies.push(Discrepancy::new(AUDITOR, reason));
                }
                discrepancies.extend(notes);

                VerificationOutcome {
                    verdict: ValidationVerdict::Invalid { discrepancies },
                    conclusive: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "Auditor failed");
                let mut discrepancies = vec![Discrepancy::new(
                    AUDITOR,
                    format!("auditor unavailable: {}", e),
                )];
                discrepancies.extend(notes);
                VerificationOutcome {
                    verdict: ValidationVerdict::Invalid { discrepancies },
                    conclusive: false,
                }
            }
        }
    }
}

const AUDITOR_PROMPT: &str = r#"You audit answers written by a personal finance analyst.
Compare the DRAFT with the RESULTS line by line.

Flag every:
- figure that is not in the results and does not follow from them by simple arithmetic,
- change described in the wrong direction (more / less, increase / decrease),
- claim about data that was not retrieved.

An answer to empty results is valid when it says no data was found.
AUTOMATIC CHECK NOTES list figures a simple matcher could not trace. It does
not know every calculation (averages over many rows, shares, rounding), so
check each listed figure yourself and ignore the note when the figure is right.

Respond ONLY with JSON: {"valid": true, "discrepancies": ["..."], "reasoning": "..."}"#;

#[derive(Debug, Deserialize)]
struct AuditorOutput {
    valid: bool,
    #[serde(default)]
    discrepancies: Vec<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

//
// ========== Grounding Rules ==========
//

/// Rule: a draft must say something
pub struct NonEmptyDraftRule;

impl VerificationRule for NonEmptyDraftRule {
    fn name(&self) -> &'static str {
        "non_empty_draft"
    }

    fn verify(
        &self,
        _goal: &str,
        draft: &str,
        _results: &BTreeMap<StepId, StepResult>,
    ) -> VerificationCheckResult {
        let passed = !draft.trim().is_empty();
        VerificationCheckResult {
            passed,
            details: if passed {
                "Draft present".to_string()
            } else {
                "draft explanation is empty".to_string()
            },
        }
    }
}

/// Rule: every significant figure in the draft should be traceable to the
/// results: a result value, a sum, mean or share over one step's column, or a
/// sum, difference, mean, ratio or percentage of two result values.
///
/// Advisory only. The matcher cannot know every calculation, so its findings
/// are handed to the auditor instead of vetoing the draft.
pub struct NumericGroundingRule;

/// Largest integer treated as a count or day of month
const SMALL_INTEGER: f64 = 31.0;

/// Most result values considered for pairwise arithmetic
const MAX_PAIRWISE_VALUES: usize = 200;

impl VerificationRule for NumericGroundingRule {
    fn name(&self) -> &'static str {
        "numeric_grounding"
    }

    fn is_blocking(&self) -> bool {
        false
    }

    fn verify(
        &self,
        goal: &str,
        draft: &str,
        results: &BTreeMap<StepId, StepResult>,
    ) -> VerificationCheckResult {
        let grounding = Grounding::collect(results);

        let mut quoted: Vec<f64> = figures(goal).into_iter().map(|f| f.value).collect();
        for result in results.values() {
            quoted.extend(figures(&result.description).into_iter().map(|f| f.value));
        }

        let unsupported: Vec<String> = figures(draft)
            .into_iter()
            .filter(|f| !is_incidental(f))
            .filter(|f| !quoted.iter().any(|q| (q - f.value).abs() < f64::EPSILON))
            .filter(|f| !grounding.supports(f))
            .map(|f| f.text)
            .collect();

        if unsupported.is_empty() {
            VerificationCheckResult {
                passed: true,
                details: "All figures grounded".to_string(),
            }
        } else {
            VerificationCheckResult {
                passed: false,
                details: format!(
                    "figures not supported by the results: {}",
                    unsupported.join(", ")
                ),
            }
        }
    }
}

/// Numbers a draft may legitimately quote
#[derive(Debug, Default)]
struct Grounding {
    /// Every numeric value found in the results
    values: Vec<f64>,
    /// Totals, means and shares computed over one step at a time
    aggregates: Vec<f64>,
}

impl Grounding {
    fn collect(results: &BTreeMap<StepId, StepResult>) -> Self {
        let mut grounding = Grounding::default();

        for result in results.values() {
            let Some(rows) = &result.rows else {
                continue;
            };

            let mut columns: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
            let mut step_values = Vec::new();
            for row in rows {
                match row {
                    Value::Object(fields) => {
                        for (name, value) in fields {
                            let column = columns.entry(name.as_str()).or_default();
                            collect_numbers(value, column);
                        }
                    }
                    other => collect_numbers(other, columns.entry("").or_default()),
                }
            }

            for column in columns.values() {
                grounding.add_aggregates(column, true);
                step_values.extend_from_slice(column);
            }
            grounding.add_aggregates(&step_values, false);
            grounding.values.extend(step_values);
        }

        grounding
    }

    fn add_aggregates(&mut self, values: &[f64], with_shares: bool) {
        if values.len() < 2 {
            return;
        }

        let total: f64 = values.iter().sum();
        self.aggregates.push(total);
        self.aggregates.push(total / values.len() as f64);

        if with_shares && total != 0.0 {
            self.aggregates
                .extend(values.iter().map(|v| v / total * 100.0));
        }
    }

    fn supports(&self, figure: &Figure) -> bool {
        let matches = |candidate: &f64| candidate.is_finite() && close_enough(figure, *candidate);

        if self.values.iter().any(matches) || self.aggregates.iter().any(matches) {
            return true;
        }

        let paired = &self.values[..self.values.len().min(MAX_PAIRWISE_VALUES)];
        for (i, a) in paired.iter().enumerate() {
            for b in &paired[i + 1..] {
                let derived = [
                    a + b,
                    (a - b).abs(),
                    (a + b) / 2.0,
                    ratio(*a, *b),
                    ratio(*b, *a),
                    ratio(*a, *b) * 100.0,
                    ratio(*b, *a) * 100.0,
                    ratio(a - b, *b).abs() * 100.0,
                    ratio(b - a, *a).abs() * 100.0,
                ];
                if derived.iter().any(matches) {
                    return true;
                }
            }
        }

        false
    }
}

/// A number as written in text
#[derive(Debug, Clone, PartialEq)]
struct Figure {
    text: String,
    value: f64,
    decimals: u32,
}

fn figures(text: &str) -> Vec<Figure> {
    let mut found = Vec::new();
    let mut current = String::new();

    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() || ((c == '.' || c == ',') && !current.is_empty()) {
            current.push(c);
            continue;
        }
        if current.is_empty() {
            continue;
        }

        let written = current.trim_end_matches(['.', ',']).to_string();
        let cleaned = written.replace(',', "");
        if let Ok(value) = cleaned.parse::<f64>() {
            let decimals = cleaned
                .split_once('.')
                .map(|(_, frac)| frac.len() as u32)
                .unwrap_or(0);
            found.push(Figure {
                text: written,
                value,
                decimals,
            });
        }
        current.clear();
    }

    found
}

/// Small counts and calendar years need no grounding
fn is_incidental(figure: &Figure) -> bool {
    let whole = figure.decimals == 0;
    (whole && figure.value <= SMALL_INTEGER) || (whole && (1900.0..=2100.0).contains(&figure.value))
}

fn ratio(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        f64::NAN
    } else {
        a / b
    }
}

/// Equal after rounding to the precision the draft used, or within 0.5%
fn close_enough(figure: &Figure, candidate: f64) -> bool {
    let half_unit = 0.5 * 10f64.powi(-(figure.decimals as i32));
    let diff = (figure.value - candidate.abs()).abs();
    diff <= half_unit + 1e-9 || diff <= candidate.abs() * 0.005
}

fn collect_numbers(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                out.push(v);
            }
        }
        Value::String(s) => {
            if let Ok(v) = s.trim().parse::<f64>() {
                out.push(v);
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_numbers(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_numbers(item, out)),
        _ => {}
    }
}

/// Create a verification engine with the standard grounding rules
pub fn create_default_verification_engine(auditor: Arc<dyn LanguageModelClient>) -> VerificationEngine {
    let mut engine = VerificationEngine::new(auditor);
    engine.add_rule(Box::new(NonEmptyDraftRule));
    engine.add_rule(Box::new(NumericGroundingRule));
    engine
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::models::PlannedStep;
    use crate::testing::ScriptedLlm;
    use serde_json::json;
    use std::time::Duration;

    fn food_results() -> BTreeMap<StepId, StepResult> {
        let mut results = BTreeMap::new();
        for (id, description, total) in [
            (1, "food total current month", 820.0),
            (2, "food total prior month", 650.0),
        ] {
            let step = PlannedStep {
                step_id: StepId(id),
                description: description.to_string(),
            };
            results.insert(
                StepId(id),
                StepResult::success(&step, vec![json!({ "total": total })], 3),
            );
        }
        results
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_grounding_accepts_derived_figures() {
        let rule = NumericGroundingRule;
        let results = food_results();

        for draft in [
            "You spent 170 more this month.",
            "Food went from $650 to $820.00.",
            "That is 26.2% more than last month.",
            "Over 2 months you spent 1,470 on food.",
        ] {
            assert!(rule.verify("compare food", draft, &results).passed, "{}", draft);
        }
    }

    #[test]
    fn test_grounding_flags_invented_figures() {
        let result =
            NumericGroundingRule.verify("compare food", "You spent 250 more this month.", &food_results());
        assert!(!result.passed);
        assert!(result.details.contains("250"));
    }

    fn step_rows(id: u32, description: &str, rows: Vec<Value>) -> BTreeMap<StepId, StepResult> {
        let step = PlannedStep {
            step_id: StepId(id),
            description: description.to_string(),
        };
        BTreeMap::from([(StepId(id), StepResult::success(&step, rows, 3))])
    }

    #[test]
    fn test_grounding_accepts_average_of_two_months() {
        let result = NumericGroundingRule.verify(
            "compare food",
            "On average you spent 735 per month on food.",
            &food_results(),
        );
        assert!(result.passed, "{}", result.details);
    }

    #[test]
    fn test_grounding_accepts_totals_means_and_shares_of_one_step() {
        let results = step_rows(
            1,
            "food purchases this month",
            vec![
                json!({ "store_name": "Corner Market", "amount": 120.5 }),
                json!({ "store_name": "Bakery", "amount": 79.5 }),
                json!({ "store_name": "Supermarket", "amount": 300.0 }),
            ],
        );

        for draft in [
            "Across 3 purchases you spent 500.00 on food.",
            "Your average food purchase was 166.67.",
            "The supermarket trip was 60% of the total.",
        ] {
            let result = NumericGroundingRule.verify("food this month", draft, &results);
            assert!(result.passed, "{}: {}", draft, result.details);
        }
    }

    #[test]
    fn test_grounding_sees_every_row_of_large_results() {
        let rows = (0..250)
            .map(|i| json!({ "amount": 10_000 + 13 * i }))
            .collect();
        let results = step_rows(1, "all purchases this year", rows);

        let result = NumericGroundingRule.verify(
            "largest purchase",
            "Your largest purchase was 13,237.",
            &results,
        );
        assert!(result.passed, "{}", result.details);
    }

    #[tokio::test]
    async fn test_untraced_figure_is_left_to_auditor() {
        let llm = Arc::new(ScriptedLlm::new().json(PromptRole::Auditor, json!({ "valid": true })));
        let engine = create_default_verification_engine(llm.clone());

        let outcome = engine
            .verify("compare food", "You spent 250 more this month.", &food_results(), deadline())
            .await;

        assert!(outcome.verdict.is_valid());
        assert!(outcome.conclusive);
        let prompt = &llm.requests_for(PromptRole::Auditor)[0].user;
        assert!(prompt.contains("AUTOMATIC CHECK NOTES"));
        assert!(prompt.contains("figures not supported by the results: 250"));
    }

    #[tokio::test]
    async fn test_rejected_draft_carries_grounding_notes() {
        let llm = ScriptedLlm::new().json(
            PromptRole::Auditor,
            json!({ "valid": false, "discrepancies": ["250 does not match the results"] }),
        );
        let engine = create_default_verification_engine(Arc::new(llm));

        let outcome = engine
            .verify("compare food", "You spent 250 more this month.", &food_results(), deadline())
            .await;

        let sources: Vec<&str> = outcome
            .verdict
            .discrepancies()
            .iter()
            .map(|d| d.source.as_str())
            .collect();
        assert_eq!(sources, vec![AUDITOR, "numeric_grounding"]);
    }

    #[tokio::test]
    async fn test_auditor_discrepancies_are_itemized() {
        let llm = ScriptedLlm::new().json(
            PromptRole::Auditor,
            json!({
                "valid": false,
                "discrepancies": ["draft direction contradicts computed difference of +170"]
            }),
        );
        let engine = create_default_verification_engine(Arc::new(llm));

        let outcome = engine
            .verify("compare food", "You spent less this month.", &food_results(), deadline())
            .await;

        assert!(outcome.conclusive);
        assert_eq!(
            outcome.verdict.discrepancies(),
            &[Discrepancy::new(
                AUDITOR,
                "draft direction contradicts computed difference of +170"
            )]
        );
    }

    #[tokio::test]
    async fn test_rules_short_circuit_auditor() {
        let llm = Arc::new(ScriptedLlm::new().json(PromptRole::Auditor, json!({ "valid": true })));
        let engine = create_default_verification_engine(llm.clone());

        let outcome = engine.verify("compare food", "  ", &food_results(), deadline()).await;

        assert_eq!(outcome.verdict.discrepancies()[0].source, "non_empty_draft");
        assert!(llm.requests_for(PromptRole::Auditor).is_empty());
    }

    #[tokio::test]
    async fn test_auditor_failure_is_inconclusive() {
        let engine = create_default_verification_engine(Arc::new(
            ScriptedLlm::new().fail(PromptRole::Auditor, LlmError::Timeout),
        ));

        let outcome = engine
            .verify("compare food", "You spent 170 more.", &food_results(), deadline())
            .await;

        assert!(!outcome.conclusive);
        assert!(!outcome.verdict.is_valid());
    }
}
