//! Conversation memory
//!
//! Append-only conversation history plus the per-turn context assembled
//! around it.

pub mod context;
pub mod store;

pub use context::{ConversationContext, ResolvedCategory, SubResult};
pub use store::{Conversation, Turn};
