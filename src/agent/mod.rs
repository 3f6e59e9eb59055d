//! Turn entry point - routes a message and composes the reply
//!
//! INPUT → ROUTE → {DIRECT DATA | ANALYSIS | CONVERSATION} → COMPOSE → RECORD

use crate::composer::{LaneOutcome, ResponseComposer};
use crate::config::OrchestratorConfig;
use crate::data::{BudgetDirectory, DataQueryExecutor};
use crate::error::OrchestrationError;
use crate::execution::ParallelExecutor;
use crate::explainer::Explainer;
use crate::llm::LanguageModelClient;
use crate::memory::{ConversationContext, Turn};
use crate::models::{AgentKind, Lane, PlannedStep, StepId, StepResult, TurnOutcome};
use crate::planner::LlmPlanner;
use crate::router::TopRouter;
use crate::verification::create_default_verification_engine;
use crate::workflow::AnalysisWorkflow;
use crate::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

/// Single entry point the API layer calls once per turn
pub struct Workflow {
    router: TopRouter,
    analysis: AnalysisWorkflow,
    executor: ParallelExecutor,
    composer: ResponseComposer,
    config: OrchestratorConfig,
}

impl Workflow {
    pub fn new(
        router: TopRouter,
        analysis: AnalysisWorkflow,
        executor: ParallelExecutor,
        composer: ResponseComposer,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            router,
            analysis,
            executor,
            composer,
            config,
        }
    }

    /// Wire the standard components around the three capabilities
    pub fn from_services(
        llm: Arc<dyn LanguageModelClient>,
        data: Arc<dyn DataQueryExecutor>,
        budgets: Arc<dyn BudgetDirectory>,
        config: OrchestratorConfig,
    ) -> Self {
        let executor = ParallelExecutor::new(data, config.step_timeout);
        let analysis = AnalysisWorkflow::new(
            Arc::new(LlmPlanner::new(llm.clone(), config.max_planned_steps)),
            executor.clone(),
            Explainer::new(llm.clone()),
            create_default_verification_engine(llm.clone()),
            config.max_iterations,
        );

        Self::new(
            TopRouter::new(llm.clone(), budgets),
            analysis,
            executor,
            ResponseComposer::new(llm, config.assistant_name.clone()),
            config,
        )
    }

    /// Handle one user turn.
    ///
    /// Degraded stages never surface as errors. Only an empty message, or a
    /// turn in which both the model and every data query failed, returns `Err`.
    pub async fn handle(
        &self,
        message: &str,
        context: &mut ConversationContext,
    ) -> Result<TurnOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        let deadline = Instant::now() + self.config.request_timeout;
        context.begin_turn();

        info!(
            user_id = context.user_id(),
            conversation_id = %context.conversation.conversation_id,
            "Turn started"
        );

        let mut agents_used = vec![AgentKind::Router];
        let decision = self.router.decide(message, context, deadline).await;

        let mut direct_result: Option<StepResult> = None;
        let mut analysis = None;

        match decision.lane {
            Lane::DirectData => {
                agents_used.push(AgentKind::DatabaseAgent);
                let step = PlannedStep {
                    step_id: StepId(1),
                    description: format!(
                        "User ask: {}\nInstruction: {}",
                        message, decision.instruction
                    ),
                };
                let result = self
                    .executor
                    .execute_one(context.user_id(), &step, self.config.direct_query_timeout)
                    .await;
                context.record_sub_result(
                    AgentKind::DatabaseAgent,
                    match &result.rows {
                        Some(rows) => format!("{} row(s)", rows.len()),
                        None => format!("failed: {}", result.error.as_deref().unwrap_or("unknown")),
                    },
                );
                direct_result = Some(result);
            }
            Lane::DeepAnalysis => {
                agents_used.push(AgentKind::BehaviourAnalyst);
                let history = context.history_summary();
                let report = self
                    .analysis
                    .run(&decision.instruction, context.user_id(), &history, deadline)
                    .await;
                context.record_sub_result(
                    AgentKind::BehaviourAnalyst,
                    format!("{:?} after {} iteration(s)", report.status, report.iterations),
                );
                analysis = Some(report);
            }
            Lane::Conversational => {}
        }

        let outcome = match (&direct_result, &analysis) {
            (Some(result), _) => LaneOutcome::DirectData {
                instruction: &decision.instruction,
                result,
            },
            (None, Some(report)) => LaneOutcome::Analysis(report),
            (None, None) => LaneOutcome::Conversation {
                instruction: &decision.instruction,
            },
        };

        agents_used.push(AgentKind::PersonalAssistant);
        let composition = self.composer.compose(message, outcome, context, deadline).await;

        let queries: Vec<&StepResult> = match (&direct_result, &analysis) {
            (Some(result), _) => vec![result],
            (None, Some(report)) => report.step_results.iter().collect(),
            (None, None) => Vec::new(),
        };
        let data_unusable = !queries.is_empty() && queries.iter().all(|r| !r.is_success());

        if composition.degraded && data_unusable {
            error!(lane = %decision.lane, "Language model and data executor both failed");
            return Err(OrchestrationError::ServicesUnavailable(format!(
                "{} data queries failed and the reply could not be composed",
                queries.len()
            )));
        }

        context.record_turn(Turn::new(
            message,
            composition.text.clone(),
            decision.lane,
            agents_used.clone(),
        ));

        info!(
            lane = %decision.lane,
            agents = agents_used.len(),
            degraded = composition.degraded,
            "Turn finished"
        );

        Ok(TurnOutcome {
            final_text: composition.text,
            data: composition.data,
            lane: decision.lane,
            rationale: decision.rationale,
            agents_used,
            warnings: context.warning_messages(),
            analysis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::APOLOGY;
    use crate::error::{LlmError, QueryError};
    use crate::llm::PromptRole;
    use crate::memory::Conversation;
    use crate::testing::{budget, ScriptedExecutor, ScriptedLlm, StaticBudgets, StepBehaviour};
    use serde_json::json;
    use tokio_test::assert_err;

    fn workflow(llm: Arc<ScriptedLlm>, executor: Arc<ScriptedExecutor>) -> Workflow {
        Workflow::from_services(
            llm,
            executor,
            Arc::new(StaticBudgets(vec![budget("Food", 650.0, 600.0)])),
            OrchestratorConfig::default(),
        )
    }

    fn context() -> ConversationContext {
        ConversationContext::new(Conversation::new(7), "Mona")
    }

    fn route(lane: &str, instruction: &str) -> serde_json::Value {
        json!({ "lane": lane, "instruction": instruction, "rationale": "test" })
    }

    #[tokio::test]
    async fn test_direct_data_turn() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .json(PromptRole::Router, route("direct_data", "Fetch the current balance"))
                .text(PromptRole::Composer, "Your balance is 1200."),
        );
        let executor = Arc::new(ScriptedExecutor::new().rows("balance", json!([{ "balance": 1200 }])));
        let workflow = workflow(llm, executor);
        let mut context = context();

        let outcome = workflow.handle("What's my balance?", &mut context).await.unwrap();

        assert_eq!(outcome.lane, Lane::DirectData);
        assert_eq!(outcome.final_text, "Your balance is 1200.");
        assert_eq!(outcome.data, Some(json!([{ "balance": 1200 }])));
        assert_eq!(
            outcome.agents_used,
            vec![AgentKind::Router, AgentKind::DatabaseAgent, AgentKind::PersonalAssistant]
        );
        assert_eq!(context.conversation.turn_count(), 1);
        assert_eq!(context.sub_results[0].summary, "1 row(s)");
    }

    #[tokio::test]
    async fn test_analysis_turn() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .json(
                    PromptRole::Router,
                    route("deep_analysis", "compare food spending this month vs last month"),
                )
                .json(
                    PromptRole::Planner,
                    json!({ "steps": ["food total current month", "food total prior month"] }),
                )
                .json(PromptRole::Explainer, json!({ "explanation": "You spent 170 more this month" }))
                .json(PromptRole::Auditor, json!({ "valid": true }))
                .text(PromptRole::Composer, "You spent 170 more on food this month."),
        );
        let executor = Arc::new(
            ScriptedExecutor::new()
                .rows("current month", json!([{ "total": 820.0 }]))
                .rows("prior month", json!([{ "total": 650.0 }])),
        );
        let workflow = workflow(llm.clone(), executor);

        let outcome = workflow
            .handle("Did I spend more on food than last month?", &mut context())
            .await
            .unwrap();

        let report = outcome.analysis.unwrap();
        assert!(report.verified);
        assert_eq!(report.iterations, 1);
        assert_eq!(outcome.agents_used[1], AgentKind::BehaviourAnalyst);
        assert!(outcome.data.is_some());

        let prompt = &llm.requests_for(PromptRole::Composer)[0].user;
        assert!(prompt.contains("You spent 170 more this month"));
    }

    #[tokio::test]
    async fn test_router_timeout_goes_conversational() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .fail(PromptRole::Router, LlmError::Timeout)
                .text(PromptRole::Composer, "Hi Mona!"),
        );
        let executor = Arc::new(ScriptedExecutor::new());
        let workflow = workflow(llm, executor.clone());

        let outcome = workflow.handle("hello", &mut context()).await.unwrap();

        assert_eq!(outcome.lane, Lane::Conversational);
        assert_eq!(
            outcome.agents_used,
            vec![AgentKind::Router, AgentKind::PersonalAssistant]
        );
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_composer_failure_returns_apology() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .json(PromptRole::Router, route("conversational", "Greet the user"))
                .fail(PromptRole::Composer, LlmError::RateLimited),
        );
        let workflow = workflow(llm, Arc::new(ScriptedExecutor::new()));

        let outcome = workflow.handle("hello", &mut context()).await.unwrap();
        assert_eq!(outcome.final_text, APOLOGY);
    }

    #[tokio::test]
    async fn test_model_and_data_both_down() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .json(PromptRole::Router, route("direct_data", "Fetch the current balance"))
                .fail(PromptRole::Composer, LlmError::Unavailable("503".to_string())),
        );
        let executor = Arc::new(ScriptedExecutor::new().on(
            "balance",
            StepBehaviour::Fail(QueryError::Backend("connection refused".to_string())),
        ));
        let workflow = workflow(llm, executor);
        let mut context = context();

        let result = workflow.handle("What's my balance?", &mut context).await;

        assert!(matches!(result, Err(OrchestrationError::ServicesUnavailable(_))));
        assert_eq!(context.conversation.turn_count(), 0);
    }

    #[tokio::test]
    async fn test_budget_warning_is_reported() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .json(PromptRole::Router, route("direct_data", "Show food spending this month"))
                .text(PromptRole::Composer, "Heads up, that would put you over your food budget."),
        );
        let executor = Arc::new(ScriptedExecutor::new().rows("food", json!([{ "spent": 600.0 }])));
        let workflow = workflow(llm, executor);

        let outcome = workflow
            .handle("I spent 80 on food, how much is left?", &mut context())
            .await
            .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("Food"));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let workflow = workflow(Arc::new(ScriptedLlm::new()), Arc::new(ScriptedExecutor::new()));
        let error = assert_err!(workflow.handle("   ", &mut context()).await);
        assert!(matches!(error, OrchestrationError::InvalidInput(_)));
    }
}
