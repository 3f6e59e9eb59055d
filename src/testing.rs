//! Scripted collaborators shared by the unit tests

use crate::data::{BudgetDirectory, DataQueryExecutor};
use crate::error::{LlmError, OrchestrationError, QueryError};
use crate::llm::{LanguageModelClient, LlmRequest, LlmResponse, PromptRole};
use crate::models::{BudgetCategory, QueryDescription, Rows};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays queued responses per prompt role. The last queued response of a
/// role is sticky and answers every further call.
#[derive(Default)]
pub struct ScriptedLlm {
    scripts: Mutex<HashMap<PromptRole, VecDeque<Result<LlmResponse, LlmError>>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, role: PromptRole, response: Result<LlmResponse, LlmError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(response);
        self
    }

    pub fn json(self, role: PromptRole, value: Value) -> Self {
        self.push(role, Ok(LlmResponse::Structured(value)))
    }

    pub fn text(self, role: PromptRole, text: &str) -> Self {
        self.push(role, Ok(LlmResponse::Text(text.to_string())))
    }

    pub fn fail(self, role: PromptRole, error: LlmError) -> Self {
        self.push(role, Err(error))
    }

    pub fn requests_for(&self, role: PromptRole) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LanguageModelClient for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(&request.role);
        match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue.front().cloned().unwrap(),
            _ => Err(LlmError::Unavailable(format!(
                "no script for {:?}",
                request.role
            ))),
        }
    }
}

#[derive(Clone)]
pub enum StepBehaviour {
    Rows(Rows),
    Fail(QueryError),
    Hang,
}

/// Answers queries by the first registered key contained in the description.
#[derive(Default)]
pub struct ScriptedExecutor {
    behaviours: Vec<(String, StepBehaviour)>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, key: &str, behaviour: StepBehaviour) -> Self {
        self.behaviours.push((key.to_string(), behaviour));
        self
    }

    pub fn rows(self, key: &str, rows: Value) -> Self {
        let rows = match rows {
            Value::Array(rows) => rows,
            other => vec![other],
        };
        self.on(key, StepBehaviour::Rows(rows))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataQueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &QueryDescription) -> Result<Rows, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let behaviour = self
            .behaviours
            .iter()
            .find(|(key, _)| query.text.contains(key.as_str()))
            .map(|(_, b)| b.clone());

        match behaviour {
            Some(StepBehaviour::Rows(rows)) => Ok(rows),
            Some(StepBehaviour::Fail(error)) => Err(error),
            Some(StepBehaviour::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            None => Err(QueryError::Backend("no data for query".to_string())),
        }
    }
}

pub struct StaticBudgets(pub Vec<BudgetCategory>);

#[async_trait]
impl BudgetDirectory for StaticBudgets {
    async fn active_budgets(&self, _user_id: i64) -> crate::Result<Vec<BudgetCategory>> {
        Ok(self.0.clone())
    }
}

pub struct FailingBudgets;

#[async_trait]
impl BudgetDirectory for FailingBudgets {
    async fn active_budgets(&self, _user_id: i64) -> crate::Result<Vec<BudgetCategory>> {
        Err(OrchestrationError::QueryError(QueryError::Backend(
            "budget table unavailable".to_string(),
        )))
    }
}

pub fn budget(name: &str, limit: f64, spent: f64) -> BudgetCategory {
    BudgetCategory {
        budget_id: 1,
        name: name.to_string(),
        monthly_limit: limit,
        spent_this_month: spent,
        priority: 5,
    }
}
