//! Session turn-taking state machine
//!
//! Four states, guarded transitions. Illegal transitions are rejected
//! silently (logged, no error) so a stale event cannot corrupt a session.

use serde::Serialize;

/// Turn-taking state of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Session exists but no audio has been seen yet
    Idle,
    /// The user holds the floor; inbound frames accumulate
    UserSpeaking,
    /// Turn ended; STT/LLM are working, no audio has been emitted yet
    AiProcessing,
    /// Assistant audio is streaming to the client
    AiSpeaking,
}

impl SessionState {
    /// Wire name of the state, as carried by `status` messages
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::UserSpeaking => "USER_SPEAKING",
            Self::AiProcessing => "AI_PROCESSING",
            Self::AiSpeaking => "AI_SPEAKING",
        }
    }

    /// Whether the assistant pipeline is active in this state
    #[must_use]
    pub const fn is_assistant_turn(self) -> bool {
        matches!(self, Self::AiProcessing | Self::AiSpeaking)
    }
}

/// Guarded state holder for one session
#[derive(Debug)]
pub struct StateMachine {
    session_id: String,
    state: SessionState,
}

impl StateMachine {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Idle,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Attempt a transition; returns true if it was applied
    pub fn transition(&mut self, to: SessionState) -> bool {
        if Self::allowed(self.state, to) {
            tracing::info!(
                session_id = %self.session_id,
                from = self.state.as_str(),
                to = to.as_str(),
                "state transition"
            );
            self.state = to;
            true
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                from = self.state.as_str(),
                to = to.as_str(),
                "rejected state transition"
            );
            false
        }
    }

    fn allowed(from: SessionState, to: SessionState) -> bool {
        use SessionState::{AiProcessing, AiSpeaking, Idle, UserSpeaking};
        matches!(
            (from, to),
            (Idle, UserSpeaking)
                | (UserSpeaking, AiProcessing | Idle)
                | (AiProcessing, AiSpeaking | UserSpeaking | Idle)
                | (AiSpeaking, UserSpeaking | Idle)
        )
    }
}
