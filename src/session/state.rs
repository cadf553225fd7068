//! Session history storage
//!
//! Ordered, append-only list of completed turns for one chat session.

use crate::models::ConversationTurn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Approximate token count, four bytes per token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    turns: Vec<ConversationTurn>,
    /// Total token count of questions and answers (approximate)
    total_tokens: usize,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turns: Vec::new(),
            total_tokens: 0,
        }
    }

    /// Append a completed turn.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.total_tokens += turn_tokens(&turn);
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Iterate over the `count` most recent turns, newest first.
    pub fn recent(&self, count: usize) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter().rev().take(count)
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.total_tokens = 0;
        self.updated_at = Utc::now();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn turn_tokens(turn: &ConversationTurn) -> usize {
    estimate_tokens(&turn.question) + estimate_tokens(&turn.final_answer)
}
