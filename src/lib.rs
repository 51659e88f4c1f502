//! Parley Gateway - real-time full-duplex voice conversation over WebSocket
//!
//! A browser streams 20 ms PCM frames in; the gateway detects the end of
//! each utterance, transcribes it, streams a language-model reply sentence
//! by sentence through a speech synthesizer and streams the audio back, all
//! incrementally and interruptible mid-reply.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Browser                          │
//! │        mic capture  │  playback  │  /ws frames        │
//! └───────────────────────┬──────────────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────────────┐
//! │                   Parley Gateway                      │
//! │  Session  │  SilenceDetector  │  Turn pipeline        │
//! └───────────────────────┬──────────────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────────────┐
//! │                  Vendor services                      │
//! │     Sarvam STT  │  OpenAI LLM  │  ElevenLabs TTS     │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod clients;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod sentence;
pub mod session;
pub mod silence;
pub mod state;
pub mod turn;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use memory::{ChatMessage, ConversationMemory, Role};
pub use sentence::SentenceSplitter;
pub use session::{Inbound, OutboundFrame, OutboundSink, Session, SessionShared};
pub use silence::{SilenceConfig, SilenceDetector};
pub use state::{SessionState, StateMachine};
pub use wire::{ClientEvent, ServerEvent};
