//! Analysis workflow - the bounded self-correcting loop
//!
//! ORCHESTRATE → PLAN → EXECUTE → EXPLAIN → VALIDATE → ORCHESTRATE ...
//!
//! Orchestrate evaluates its rules in strict order and the stall/ceiling
//! check always comes first. Every pass through Validate advances the
//! iteration count, so a run ends within `max_iterations` validations.

pub mod state;

pub use state::{AnalysisState, Stage};

use crate::execution::ParallelExecutor;
use crate::explainer::{ExplainRequest, Explainer};
use crate::fingerprint::{plan_fingerprint, validation_fingerprint};
use crate::models::{AbortReason, AnalysisReport, AnalysisStatus, ValidationVerdict};
use crate::planner::{PlanRequest, Planner};
use crate::verification::VerificationEngine;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Reply used when a run aborts before any draft exists
pub const INSUFFICIENT_DATA: &str =
    "I could not gather enough reliable data to answer this question.";

pub struct AnalysisWorkflow {
    planner: Arc<dyn Planner>,
    executor: ParallelExecutor,
    explainer: Explainer,
    verifier: VerificationEngine,
    max_iterations: u32,
}

impl AnalysisWorkflow {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: ParallelExecutor,
        explainer: Explainer,
        verifier: VerificationEngine,
        max_iterations: u32,
    ) -> Self {
        Self {
            planner,
            executor,
            explainer,
            verifier,
            max_iterations,
        }
    }

    /// Run the workflow for one analytic goal
    pub async fn run(
        &self,
        goal: &str,
        user_id: i64,
        history: &str,
        deadline: Instant,
    ) -> AnalysisReport {
        info!(goal = %goal, max_iterations = self.max_iterations, "Analysis: starting");

        let mut state = AnalysisState::new(goal);
        let mut stage = Stage::Orchestrate;

        loop {
            let next = match stage {
                Stage::Orchestrate => self.orchestrate(&state),
                Stage::Plan => self.plan(&mut state, history, deadline).await,
                Stage::Execute => self.execute(&mut state, user_id).await,
                Stage::Explain => self.explain(&mut state, deadline).await,
                Stage::Validate => self.validate(&mut state, deadline).await,
                Stage::Done(status) => return finish(state, status),
            };

            debug!(
                from = %stage,
                to = %next,
                iteration = state.iteration_count,
                "Analysis transition"
            );
            stage = next;
        }
    }

    /// Decide the next stage. Rules are evaluated in priority order.
    pub fn orchestrate(&self, state: &AnalysisState) -> Stage {
        // 1. Stall / ceiling
        if let Some(reason) = state.stall {
            return Stage::Done(AnalysisStatus::Aborted(reason));
        }
        // A valid verdict from the last permitted round is kept; nothing runs past the ceiling
        if state.iteration_count >= self.max_iterations {
            return if state.validation_verdict.is_valid() {
                Stage::Done(AnalysisStatus::Completed)
            } else {
                Stage::Done(AnalysisStatus::Aborted(AbortReason::IterationCeiling))
            };
        }

        // 2. New data needed
        if state.planned_steps.is_empty() || state.pending_data_request.is_some() {
            return Stage::Plan;
        }

        // 3. Quality gate
        if !state.validation_verdict.is_valid() {
            return Stage::Explain;
        }

        Stage::Done(AnalysisStatus::Completed)
    }

    async fn plan(&self, state: &mut AnalysisState, history: &str, deadline: Instant) -> Stage {
        let request = PlanRequest {
            goal: &state.goal,
            data_request: state.pending_data_request.as_deref(),
            feedback: &state.feedback,
            previous_steps: &state.planned_steps,
            history,
        };

        let steps = match self.planner.create_plan(&request, deadline).await {
            Ok(steps) => steps,
            Err(e) => {
                warn!(error = %e, "Planning failed, treating as stall");
                state.stall = Some(AbortReason::PlanningFailed);
                return Stage::Orchestrate;
            }
        };

        let fingerprint = plan_fingerprint(&state.goal, &steps);
        let step_count = steps.len();

        if !state.adopt_plan(steps, fingerprint.clone()) {
            warn!(plan_fingerprint = %fingerprint, "Planner repeated an earlier plan");
            state.stall = Some(AbortReason::Stalled);
            return Stage::Orchestrate;
        }

        info!(plan_fingerprint = %fingerprint, step_count, "Plan adopted");
        Stage::Execute
    }

    async fn execute(&self, state: &mut AnalysisState, user_id: i64) -> Stage {
        let Some(fingerprint) = state.plan_fingerprint.clone() else {
            return Stage::Orchestrate;
        };

        let results = self.executor.execute_many(user_id, &state.planned_steps).await;
        let merged = state.merge_results(&fingerprint, results);

        debug!(
            merged,
            succeeded = state.raw_results.values().filter(|r| r.is_success()).count(),
            "Execution merged"
        );
        Stage::Explain
    }

    async fn explain(&self, state: &mut AnalysisState, deadline: Instant) -> Stage {
        let request = ExplainRequest {
            goal: &state.goal,
            results: &state.raw_results,
            previous_draft: state.draft_explanation.as_deref(),
            discrepancies: &state.feedback,
        };

        let explanation = self.explainer.explain(&request, deadline).await;

        if let Some(needed) = &explanation.data_request {
            info!(data_request = %needed, "Draft asks for more data");
        }
        if explanation.degraded {
            warn!(iteration = state.iteration_count, "Explainer unavailable, using fallback draft");
        }

        state.draft_explanation = Some(explanation.text);
        state.draft_is_fallback = explanation.degraded;
        state.pending_data_request = explanation.data_request;
        Stage::Validate
    }

    /// Validate the current draft. Unchanged inputs reuse the earlier verdict.
    pub async fn validate(&self, state: &mut AnalysisState, deadline: Instant) -> Stage {
        let draft = state.draft_explanation.clone().unwrap_or_default();
        let fingerprint = validation_fingerprint(&draft, &state.raw_results);

        let verdict = match state.cached_verdict(&fingerprint) {
            Some(verdict) => {
                debug!("Reusing verdict for unchanged draft and results");
                verdict.clone()
            }
            None => {
                let outcome = self
                    .verifier
                    .verify(&state.goal, &draft, &state.raw_results, deadline)
                    .await;
                if outcome.conclusive {
                    state.remember_verdict(fingerprint, outcome.verdict.clone());
                }
                outcome.verdict
            }
        };

        state.record_verdict(verdict);

        info!(
            iteration = state.iteration_count,
            valid = state.validation_verdict.is_valid(),
            discrepancies = state.feedback.len(),
            "Validation round finished"
        );
        Stage::Orchestrate
    }
}

fn finish(state: AnalysisState, status: AnalysisStatus) -> AnalysisReport {
    // An aborted run is never reported as verified, whatever the last verdict said
    let verified = status == AnalysisStatus::Completed && state.validation_verdict.is_valid();

    let (explanation, fallback_draft) = match state.draft_explanation {
        Some(draft) if !draft.trim().is_empty() => (draft, state.draft_is_fallback),
        _ => (INSUFFICIENT_DATA.to_string(), false),
    };

    match status {
        AnalysisStatus::Completed => info!(iterations = state.iteration_count, "Analysis: completed"),
        AnalysisStatus::Aborted(reason) => warn!(
            iterations = state.iteration_count,
            reason = ?reason,
            verified,
            "Analysis: aborted"
        ),
    }

    let discrepancies = match state.validation_verdict {
        ValidationVerdict::Invalid { discrepancies } => discrepancies,
        _ => Vec::new(),
    };

    AnalysisReport {
        goal: state.goal,
        status,
        explanation,
        verified,
        fallback_draft,
        iterations: state.iteration_count,
        discrepancies,
        step_results: state.raw_results.into_values().collect(),
    }
}
