//! Working memory of one analysis run

use crate::models::{AbortReason, AnalysisStatus, Discrepancy, PlannedStep, StepId, StepResult, ValidationVerdict};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Orchestrate,
    Plan,
    Execute,
    Explain,
    Validate,
    Done(AnalysisStatus),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Orchestrate => write!(f, "orchestrate"),
            Stage::Plan => write!(f, "plan"),
            Stage::Execute => write!(f, "execute"),
            Stage::Explain => write!(f, "explain"),
            Stage::Validate => write!(f, "validate"),
            Stage::Done(AnalysisStatus::Completed) => write!(f, "done(success)"),
            Stage::Done(AnalysisStatus::Aborted(_)) => write!(f, "done(aborted)"),
        }
    }
}

/// Created at workflow entry, dropped at exit
#[derive(Debug, Clone)]
pub struct AnalysisState {
    pub goal: String,
    pub planned_steps: Vec<PlannedStep>,
    pub raw_results: BTreeMap<StepId, StepResult>,
    pub draft_explanation: Option<String>,
    /// The current draft came from the explainer's fallback
    pub draft_is_fallback: bool,
    pub validation_verdict: ValidationVerdict,
    pub iteration_count: u32,
    pub previous_fingerprints: HashSet<String>,
    /// Fingerprint of the plan currently in force
    pub plan_fingerprint: Option<String>,
    /// Data the last draft said it still needs
    pub pending_data_request: Option<String>,
    /// Discrepancies of the last failed validation
    pub feedback: Vec<Discrepancy>,
    /// Set by the Plan stage; acted on by Orchestrate
    pub stall: Option<AbortReason>,
    /// Verdicts keyed on the fingerprint of (draft, results)
    verdicts: HashMap<String, ValidationVerdict>,
}

impl AnalysisState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            planned_steps: Vec::new(),
            raw_results: BTreeMap::new(),
            draft_explanation: None,
            draft_is_fallback: false,
            validation_verdict: ValidationVerdict::Unchecked,
            iteration_count: 0,
            previous_fingerprints: HashSet::new(),
            plan_fingerprint: None,
            pending_data_request: None,
            feedback: Vec::new(),
            stall: None,
            verdicts: HashMap::new(),
        }
    }

    /// Install a new plan. Returns false, and changes nothing, when the
    /// fingerprint was already seen in this run.
    pub fn adopt_plan(&mut self, steps: Vec<PlannedStep>, fingerprint: String) -> bool {
        if !self.previous_fingerprints.insert(fingerprint.clone()) {
            return false;
        }

        self.planned_steps = steps;
        self.raw_results.clear();
        self.plan_fingerprint = Some(fingerprint);
        self.pending_data_request = None;
        self.feedback.clear();
        self.validation_verdict = ValidationVerdict::Unchecked;
        true
    }

    /// Merge results produced under `fingerprint`. Results of a superseded
    /// plan, or for steps the plan does not contain, are discarded.
    pub fn merge_results(
        &mut self,
        fingerprint: &str,
        results: BTreeMap<StepId, StepResult>,
    ) -> usize {
        if self.plan_fingerprint.as_deref() != Some(fingerprint) {
            warn!(result_count = results.len(), "Discarding results of a superseded plan");
            return 0;
        }

        let mut merged = 0;
        for (step_id, result) in results {
            if self.planned_steps.iter().any(|s| s.step_id == step_id) {
                self.raw_results.insert(step_id, result);
                merged += 1;
            } else {
                warn!(step_id = %step_id, "Discarding result for a step outside the plan");
            }
        }
        merged
    }

    pub fn cached_verdict(&self, fingerprint: &str) -> Option<&ValidationVerdict> {
        self.verdicts.get(fingerprint)
    }

    pub fn remember_verdict(&mut self, fingerprint: String, verdict: ValidationVerdict) {
        self.verdicts.insert(fingerprint, verdict);
    }

    /// Store a verdict and close the iteration.
    pub fn record_verdict(&mut self, verdict: ValidationVerdict) {
        self.feedback = verdict.discrepancies().to_vec();
        self.validation_verdict = verdict;
        self.iteration_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepStatus;
    use serde_json::json;

    fn plan() -> Vec<PlannedStep> {
        vec![PlannedStep {
            step_id: StepId(1),
            description: "food total current month".to_string(),
        }]
    }

    fn results(id: u32) -> BTreeMap<StepId, StepResult> {
        let step = PlannedStep {
            step_id: StepId(id),
            description: "food total current month".to_string(),
        };
        let mut map = BTreeMap::new();
        map.insert(StepId(id), StepResult::success(&step, vec![json!({ "total": 820.0 })], 2));
        map
    }

    #[test]
    fn test_repeated_fingerprint_is_refused() {
        let mut state = AnalysisState::new("compare food spending");
        assert!(state.adopt_plan(plan(), "fp-1".to_string()));
        state.merge_results("fp-1", results(1));

        assert!(!state.adopt_plan(plan(), "fp-1".to_string()));
        // The refused plan did not wipe the current results
        assert_eq!(state.raw_results.len(), 1);
    }

    #[test]
    fn test_stale_results_are_not_merged() {
        let mut state = AnalysisState::new("compare food spending");
        state.adopt_plan(plan(), "fp-1".to_string());
        state.adopt_plan(plan(), "fp-2".to_string());

        assert_eq!(state.merge_results("fp-1", results(1)), 0);
        assert!(state.raw_results.is_empty());

        assert_eq!(state.merge_results("fp-2", results(9)), 0);
        assert_eq!(state.merge_results("fp-2", results(1)), 1);
        assert_eq!(state.raw_results[&StepId(1)].status, StepStatus::Success);
    }

    #[test]
    fn test_record_verdict_advances_iteration() {
        let mut state = AnalysisState::new("goal");
        state.record_verdict(ValidationVerdict::Invalid {
            discrepancies: vec![Discrepancy::new("auditor", "wrong direction")],
        });

        assert_eq!(state.iteration_count, 1);
        assert_eq!(state.feedback.len(), 1);

        state.record_verdict(ValidationVerdict::Valid);
        assert_eq!(state.iteration_count, 2);
        assert!(state.feedback.is_empty());
    }
}
