//! Conversation store for a single chat session.
//!
//! A conversation is an append-only list of [`Turn`]s plus the "thinking"
//! flag that is raised between a user turn and the assistant reply to it.

use chrono::Local;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

/// Current local time as `HH:MM`.
pub fn current_timestamp() -> String {
    Local::now().format("%H:%M").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

impl Turn {
    fn now(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            timestamp: current_timestamp(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("message is empty")]
    Empty,
    #[error("a reply is still being generated")]
    Busy,
}

/// Handed out by [`ConversationState::begin_turn`] and redeemed by
/// [`ConversationState::finish_turn`] once the reply is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub question: String,
    epoch: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub turns: Vec<Turn>,
    pub thinking: bool,
    #[serde(skip)]
    epoch: u64,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            turns: vec![Turn::now(Role::Assistant, constants::GREETING.to_string())],
            thinking: false,
            epoch: 0,
        }
    }

    /// Back to the seed greeting. Any reply still in flight is dropped when it lands.
    pub fn reset(&mut self) {
        self.turns = vec![Turn::now(Role::Assistant, constants::GREETING.to_string())];
        self.thinking = false;
        self.epoch += 1;
    }

    pub fn append_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::now(Role::User, content.into()));
    }

    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::now(Role::Assistant, content.into()));
    }

    pub fn last_user_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.role == Role::User)
    }

    pub fn is_idle(&self) -> bool {
        !self.thinking
    }

    /// Idle -> Thinking: stores the user turn and raises the thinking flag.
    pub fn begin_turn(&mut self, text: &str) -> Result<PendingTurn, SubmitError> {
        if self.thinking {
            return Err(SubmitError::Busy);
        }
        if text.trim().is_empty() {
            return Err(SubmitError::Empty);
        }
        self.append_user(text);
        self.thinking = true;
        Ok(PendingTurn {
            question: text.to_string(),
            epoch: self.epoch,
        })
    }

    /// Thinking -> Idle. Returns `false` if the conversation was reset since
    /// `pending` was issued; the reply is discarded in that case.
    pub fn finish_turn(&mut self, pending: PendingTurn, reply: impl Into<String>) -> bool {
        if pending.epoch != self.epoch {
            return false;
        }
        self.append_assistant(reply);
        self.thinking = false;
        true
    }
}
