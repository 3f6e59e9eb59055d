//! Core data models for the finance assistant

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Result rows of one data query, one JSON object per row.
pub type Rows = Vec<Value>;

//
// ================= Routing =================
//

/// Top-level route a turn can take
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    DirectData,
    DeepAnalysis,
    Conversational,
}

impl Lane {
    /// Parse a lane label emitted by the routing model. Agent names used by
    /// older prompts are accepted as aliases.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace('-', "_").as_str() {
            "direct_data" | "database_agent" | "data" => Some(Lane::DirectData),
            "deep_analysis" | "behaviour_analyst" | "behavior_analyst" | "analysis" => {
                Some(Lane::DeepAnalysis)
            }
            "conversational" | "personal_assistant_response" | "personal_assistant" => {
                Some(Lane::Conversational)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lane::DirectData => "direct_data",
            Lane::DeepAnalysis => "deep_analysis",
            Lane::Conversational => "conversational",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingDecision {
    pub lane: Lane,
    /// Short justification, kept for logging and audit
    pub rationale: String,
    /// Instruction forwarded to the chosen lane
    pub instruction: String,
}

impl RoutingDecision {
    /// Fail-safe decision used whenever routing cannot be trusted.
    pub fn conversational_fallback(reason: impl Into<String>) -> Self {
        Self {
            lane: Lane::Conversational,
            rationale: reason.into(),
            instruction: "Respond to the user directly.".to_string(),
        }
    }
}

/// Components that may take part in producing a reply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Router,
    DatabaseAgent,
    BehaviourAnalyst,
    PersonalAssistant,
}

//
// ================= Query Steps =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepId(pub u32);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step-{}", self.0)
    }
}

/// One atomic read query produced by the planner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedStep {
    pub step_id: StepId,
    pub description: String,
}

/// A read-only query description scoped to one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryDescription {
    pub user_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    TimedOut,
    Rejected,
}

/// Outcome of one planned query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_id: StepId,
    pub description: String,
    pub status: StepStatus,
    pub rows: Option<Rows>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(step: &PlannedStep, rows: Rows, duration_ms: u64) -> Self {
        Self {
            step_id: step.step_id,
            description: step.description.clone(),
            status: StepStatus::Success,
            rows: Some(rows),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(
        step: &PlannedStep,
        status: StepStatus,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_id: step.step_id,
            description: step.description.clone(),
            status,
            rows: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

//
// ================= Validation =================
//

/// One itemized problem found in a draft explanation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discrepancy {
    /// Rule name or "auditor"
    pub source: String,
    pub detail: String,
}

impl Discrepancy {
    pub fn new(source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.detail)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    #[default]
    Unchecked,
    Valid,
    Invalid { discrepancies: Vec<Discrepancy> },
}

impl ValidationVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationVerdict::Valid)
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        match self {
            ValidationVerdict::Invalid { discrepancies } => discrepancies,
            _ => &[],
        }
    }
}

//
// ================= Budgets =================
//

/// Active budget category as supplied by the data layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetCategory {
    pub budget_id: i64,
    pub name: String,
    /// Limits are per month
    pub monthly_limit: f64,
    pub spent_this_month: f64,
    pub priority: i16,
}

impl BudgetCategory {
    pub fn remaining(&self) -> f64 {
        self.monthly_limit - self.spent_this_month
    }
}

/// Advisory note produced by the budget pre-check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetWarning {
    pub category: String,
    pub amount: f64,
    pub remaining: f64,
    pub message: String,
}

//
// ================= Analysis Result =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The same plan fingerprint came up twice
    Stalled,
    /// The planner could not decompose the goal
    PlanningFailed,
    /// Iteration ceiling reached without a valid verdict
    IterationCeiling,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
    Aborted(AbortReason),
}

/// What an analysis run hands to the response composer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub goal: String,
    pub status: AnalysisStatus,
    pub explanation: String,
    pub verified: bool,
    /// The explanation is a literal listing of the results, not a model draft
    #[serde(default)]
    pub fallback_draft: bool,
    pub iterations: u32,
    pub discrepancies: Vec<Discrepancy>,
    pub step_results: Vec<StepResult>,
}

//
// ================= Final Result =================
//

/// Everything one call to `Workflow::handle` produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub final_text: String,
    pub data: Option<Value>,
    pub lane: Lane,
    pub rationale: String,
    pub agents_used: Vec<AgentKind>,
    pub warnings: Vec<String>,
    pub analysis: Option<AnalysisReport>,
}
