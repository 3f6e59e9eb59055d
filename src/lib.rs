//! Finance Assistant Orchestrator
//!
//! The orchestration engine of a personal finance assistant:
//! - Routes each message to one lane (direct data, deep analysis, conversation)
//! - Decomposes analytic questions into parallel read-only queries
//! - Drafts explanations and checks them against the data before replying
//! - Stops on a repeated plan or at a fixed iteration ceiling
//! - Composes every reply through one persona
//!
//! ANALYSIS LOOP:
//! ORCHESTRATE → PLAN → EXECUTE → EXPLAIN → VALIDATE → ORCHESTRATE? → DONE

pub mod agent;
pub mod classifier;
pub mod composer;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod explainer;
pub mod fingerprint;
pub mod llm;
pub mod memory;
pub mod models;
pub mod planner;
pub mod router;
pub mod verification;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use error::Result;

// Re-export common types
pub use agent::Workflow;
pub use config::OrchestratorConfig;
pub use memory::{Conversation, ConversationContext};
pub use models::*;
