//! History window
//!
//! Picks the recent turns that go into the synthesis prompt: at most
//! `max_turns`, dropping the oldest until the window fits `max_tokens`.
//! Failed turns carry no usable answer and are skipped.

use crate::models::{ConversationTurn, TurnOutcome};
use crate::session::state::{turn_tokens, SessionState};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub max_turns: usize,
    /// Approximate token budget for the rendered window
    pub max_tokens: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 3,
            max_tokens: 2_000,
        }
    }
}

pub struct HistoryWindow {
    config: HistoryConfig,
}

impl HistoryWindow {
    pub fn new(config: HistoryConfig) -> Self {
        Self { config }
    }

    /// Turns in the window, oldest first.
    pub fn select<'a>(&self, state: &'a SessionState) -> Vec<&'a ConversationTurn> {
        let mut budget = self.config.max_tokens;
        let mut window = Vec::with_capacity(self.config.max_turns);

        for turn in state
            .recent(state.len())
            .filter(|t| t.outcome != TurnOutcome::Error)
            .take(self.config.max_turns)
        {
            let cost = turn_tokens(turn);
            if cost > budget {
                break;
            }
            budget -= cost;
            window.push(turn);
        }

        window.reverse();
        window
    }

    /// Prompt text for the window, `None` when it is empty.
    pub fn render(&self, state: &SessionState) -> Option<String> {
        let window = self.select(state);
        if window.is_empty() {
            return None;
        }

        debug!(turns = window.len(), "Including conversation history");

        Some(
            window
                .iter()
                .map(|t| format!("Q: {}\nA: {}", t.question, t.final_answer))
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}
