//! JSON control messages exchanged with the browser over the WebSocket
//!
//! Binary frames carry audio in both directions; everything else is a tagged
//! JSON text frame described here.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;

/// Wire state name used when the inactivity watchdog closes a session
pub const TIMEOUT_STATE: &str = "TIMEOUT";

/// Outgoing control message to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// State transition broadcast
    Status { state: &'static str },
    /// Finalized user utterance for display
    Transcript { text: String },
    /// Assistant response text; `has_audio: false` asks the client to
    /// synthesize locally
    TtsText { text: String, has_audio: bool },
    /// A new assistant audio stream begins
    AudioStart,
    /// The assistant audio stream ended normally
    AudioEnd { audio_bytes_sent: u64 },
    /// Drop any buffered or playing audio immediately
    Interrupt,
    /// Human-readable non-fatal error
    Error { message: String },
    /// Keepalive; no client response required
    Ping,
}

impl ServerEvent {
    /// Status message for a session state
    #[must_use]
    pub const fn status(state: SessionState) -> Self {
        Self::Status {
            state: state.as_str(),
        }
    }

    /// Status message emitted before an inactivity teardown
    #[must_use]
    pub const fn timeout() -> Self {
        Self::Status {
            state: TIMEOUT_STATE,
        }
    }
}

/// Incoming control message from the client
///
/// Text frames are reserved for future client-initiated controls; only a
/// keepalive ping is recognized today.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_wire_state_name() {
        let json = serde_json::to_string(&ServerEvent::status(SessionState::AiSpeaking)).unwrap();
        assert_eq!(json, r#"{"type":"status","state":"AI_SPEAKING"}"#);
    }

    #[test]
    fn timeout_status_serializes() {
        let json = serde_json::to_string(&ServerEvent::timeout()).unwrap();
        assert_eq!(json, r#"{"type":"status","state":"TIMEOUT"}"#);
    }

    #[test]
    fn tts_text_carries_fallback_flag() {
        let msg = ServerEvent::TtsText {
            text: "Hello!".to_string(),
            has_audio: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"tts_text""#));
        assert!(json.contains(r#""has_audio":false"#));
    }

    #[test]
    fn unit_events_serialize_without_fields() {
        assert_eq!(
            serde_json::to_string(&ServerEvent::AudioStart).unwrap(),
            r#"{"type":"audio_start"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerEvent::Interrupt).unwrap(),
            r#"{"type":"interrupt"}"#
        );
    }

    #[test]
    fn client_ping_deserializes() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Ping));
    }

    #[test]
    fn unknown_client_message_is_an_error() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"mystery"}"#).is_err());
    }
}
