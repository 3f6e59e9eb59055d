//! Conversation history
//!
//! A conversation is an append-only sequence of turns. Only the derived
//! `last_activity` timestamp changes after a turn has been recorded.

use crate::models::{AgentKind, Lane};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// One user message and the reply produced for it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub turn_id: Uuid,
    pub user_message: String,
    pub reply: String,
    pub lane: Lane,
    pub agents_used: Vec<AgentKind>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(
        user_message: impl Into<String>,
        reply: impl Into<String>,
        lane: Lane,
        agents_used: Vec<AgentKind>,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            user_message: user_message.into(),
            reply: reply.into(),
            lane,
            agents_used,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: Uuid,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    turns: VecDeque<Turn>,
}

impl Conversation {
    /// Start a conversation for a new session
    pub fn new(user_id: i64) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: Uuid::new_v4(),
            user_id,
            created_at: now,
            last_activity: now,
            turns: VecDeque::new(),
        }
    }

    /// Rebuild a conversation from turns the persistence layer already holds.
    pub fn restore(conversation_id: Uuid, user_id: i64, turns: Vec<Turn>) -> Self {
        let created_at = turns.first().map(|t| t.created_at).unwrap_or_else(Utc::now);
        let last_activity = turns.last().map(|t| t.created_at).unwrap_or(created_at);

        Self {
            conversation_id,
            user_id,
            created_at,
            last_activity,
            turns: turns.into(),
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.last_activity = turn.created_at;
        self.turns.push_back(turn);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// The `count` most recent turns, oldest first
    pub fn recent_turns(&self, count: usize) -> impl Iterator<Item = &Turn> {
        let skip = self.turns.len().saturating_sub(count);
        self.turns.iter().skip(skip)
    }

    /// Recent history formatted as `Sender: content` lines for prompts
    pub fn summary(&self, depth: usize) -> String {
        if self.turns.is_empty() || depth == 0 {
            return "No previous messages in this conversation.".to_string();
        }

        let mut text = String::new();
        for turn in self.recent_turns(depth) {
            text.push_str(&format!("User: {}\n", turn.user_message));
            text.push_str(&format!("Assistant: {}\n", turn.reply));
        }
        text
    }
}
