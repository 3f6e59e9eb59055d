//! Orchestrator configuration
//!
//! Defaults mirror the production limits; every value can be overridden
//! through `ORCHESTRATOR_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Tunables for routing, analysis and composition.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Validation rounds allowed before an analysis run is aborted
    pub max_iterations: u32,
    /// Budget for a single planned query inside the Execute stage
    pub step_timeout: Duration,
    /// Budget for the single query of the direct data lane
    pub direct_query_timeout: Duration,
    /// Overall deadline for one turn; every model call inherits it
    pub request_timeout: Duration,
    /// Upper bound on steps accepted from the planner
    pub max_planned_steps: usize,
    /// Number of previous turns rendered into prompts
    pub history_depth: usize,
    /// Persona name used by the response composer
    pub assistant_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            step_timeout: Duration::from_secs(10),
            direct_query_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(90),
            max_planned_steps: 4,
            history_depth: 20,
            assistant_name: "Personal Finance Assistant".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_iterations: read_var("ORCHESTRATOR_MAX_ITERATIONS")
                .filter(|v: &u32| *v > 0)
                .unwrap_or(defaults.max_iterations),
            step_timeout: read_var("ORCHESTRATOR_STEP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.step_timeout),
            direct_query_timeout: read_var("ORCHESTRATOR_DIRECT_QUERY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.direct_query_timeout),
            request_timeout: read_var("ORCHESTRATOR_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_planned_steps: read_var("ORCHESTRATOR_MAX_PLANNED_STEPS")
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.max_planned_steps),
            history_depth: read_var("ORCHESTRATOR_HISTORY_DEPTH")
                .unwrap_or(defaults.history_depth),
            assistant_name: env::var("ORCHESTRATOR_ASSISTANT_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.assistant_name),
        }
    }
}

fn read_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.step_timeout, Duration::from_secs(10));
        assert_eq!(config.max_planned_steps, 4);
    }

    #[test]
    fn test_env_overrides_and_fallbacks() {
        env::set_var("ORCHESTRATOR_MAX_ITERATIONS", "3");
        env::set_var("ORCHESTRATOR_STEP_TIMEOUT_SECS", "not-a-number");

        let config = OrchestratorConfig::from_env();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.step_timeout, Duration::from_secs(10));

        env::remove_var("ORCHESTRATOR_MAX_ITERATIONS");
        env::remove_var("ORCHESTRATOR_STEP_TIMEOUT_SECS");
    }
}
