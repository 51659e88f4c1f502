//! Per-session conversation memory
//!
//! Append-only within a session. A user/assistant pair is committed together
//! after the assistant finishes speaking; interrupted responses are never
//! recorded, so memory always alternates user, assistant, user, assistant.

use serde::Serialize;

/// System prompt prepended to every LLM request
pub const SYSTEM_PROMPT: &str = "You are a helpful voice assistant. \
    Keep every response to 1-2 short sentences - you are speaking aloud, not writing. \
    Never use bullet points, markdown, or lists. Be direct and natural.";

/// Speaker role in a chat exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message, serialized in the OpenAI messages format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered conversation history for one session
#[derive(Debug, Default)]
pub struct ConversationMemory {
    entries: Vec<ChatMessage>,
}

impl ConversationMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed turn: the user utterance and the assistant reply
    /// are appended together, or not at all
    pub fn commit_turn(&mut self, user: &str, assistant: &str) {
        self.entries.push(ChatMessage::user(user));
        self.entries.push(ChatMessage::assistant(assistant));
    }

    /// Build the message list for an LLM request: system prompt, history,
    /// then the not-yet-committed user transcript
    #[must_use]
    pub fn build_request(&self, pending_user: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.entries.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend(self.entries.iter().cloned());
        messages.push(ChatMessage::user(pending_user));
        messages
    }

    /// Committed entries, oldest first
    #[must_use]
    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
