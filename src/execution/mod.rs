//! Parallel execution of planned queries
//!
//! Every step runs on its own task with its own timeout. A failing,
//! timed-out or panicking step never cancels its siblings.
//! LLM is NOT allowed here.

use crate::data::{ensure_read_only, DataQueryExecutor};
use crate::error::QueryError;
use crate::models::{PlannedStep, QueryDescription, StepId, StepResult, StepStatus};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fans planned steps out to a `DataQueryExecutor`
#[derive(Clone)]
pub struct ParallelExecutor {
    executor: Arc<dyn DataQueryExecutor>,
    step_timeout: Duration,
}

impl ParallelExecutor {
    pub fn new(executor: Arc<dyn DataQueryExecutor>, step_timeout: Duration) -> Self {
        Self {
            executor,
            step_timeout,
        }
    }

    /// Run one query under the given timeout, outside the fan-out.
    pub async fn execute_one(
        &self,
        user_id: i64,
        step: &PlannedStep,
        timeout: Duration,
    ) -> StepResult {
        run_step(self.executor.clone(), user_id, step.clone(), timeout).await
    }

    /// Execute all steps concurrently. The returned map has exactly one entry
    /// per input step id.
    pub async fn execute_many(
        &self,
        user_id: i64,
        steps: &[PlannedStep],
    ) -> BTreeMap<StepId, StepResult> {
        debug!(step_count = steps.len(), "Dispatching planned steps");

        let handles = steps.iter().map(|step| {
            let executor = self.executor.clone();
            let owned = step.clone();
            let timeout = self.step_timeout;
            tokio::spawn(run_step(executor, user_id, owned, timeout))
        });

        let joined = join_all(handles).await;

        let mut results = BTreeMap::new();
        for (step, outcome) in steps.iter().zip(joined) {
            let result = match outcome {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(step_id = %step.step_id, error = %join_error, "Step task aborted");
                    StepResult::failure(
                        step,
                        StepStatus::Failed,
                        format!("step task aborted: {}", join_error),
                        0,
                    )
                }
            };
            results.insert(step.step_id, result);
        }

        debug!(
            succeeded = results.values().filter(|r| r.is_success()).count(),
            total = results.len(),
            "Planned steps finished"
        );

        results
    }
}

async fn run_step(
    executor: Arc<dyn DataQueryExecutor>,
    user_id: i64,
    step: PlannedStep,
    timeout: Duration,
) -> StepResult {
    let start = Instant::now();

    if let Err(e) = ensure_read_only(&step.description) {
        warn!(step_id = %step.step_id, error = %e, "Refusing mutating step");
        return StepResult::failure(&step, StepStatus::Rejected, e.to_string(), 0);
    }

    let query = QueryDescription {
        user_id,
        text: step.description.clone(),
    };

    let outcome = tokio::time::timeout(timeout, executor.execute(&query)).await;
    let elapsed = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(rows)) => StepResult::success(&step, rows, elapsed),
        Ok(Err(e)) => {
            warn!(step_id = %step.step_id, error = %e, "Step failed");
            let status = match &e {
                QueryError::MutationRejected(_) => StepStatus::Rejected,
                _ => StepStatus::Failed,
            };
            StepResult::failure(&step, status, e.to_string(), elapsed)
        }
        Err(_) => {
            let e = QueryError::Timeout(timeout.as_millis() as u64);
            warn!(step_id = %step.step_id, error = %e, "Step timed out");
            StepResult::failure(&step, StepStatus::TimedOut, e.to_string(), elapsed)
        }
    }
}
