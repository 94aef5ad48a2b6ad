//! Session - sliding window of completed turns
//!
//! Holds the conversation for one session id and renders recent turns for
//! prompt injection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::orchestrator::Turn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Session {
    pub fn new(session_id: impl Into<String>, max_turns: usize) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// Append a finished turn, dropping the oldest past the window
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last_n(&self, n: usize) -> Vec<&Turn> {
        self.turns.iter().rev().take(n).rev().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Format the last `n` turns for prompt injection
    pub fn format_for_prompt(&self, n: usize) -> String {
        self.last_n(n)
            .into_iter()
            .map(|turn| {
                let answer = turn
                    .final_response
                    .as_ref()
                    .map(|r| r.text.as_str())
                    .unwrap_or("");
                format!("User: {}\nAssistant: {}", turn.query.text, answer)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
