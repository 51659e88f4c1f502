//! Vendor client adapters
//!
//! Three thin HTTP wrappers behind trait seams: speech-to-text, streaming
//! chat completion, and streaming speech synthesis. The traits exist so the
//! pipeline can be driven by mocks in tests; production wiring lives in
//! [`ExternalClients::from_config`].

mod elevenlabs;
mod openai;
mod sarvam;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub use elevenlabs::ElevenLabsTts;
pub use openai::OpenAiLlm;
pub use sarvam::SarvamStt;

use crate::config::Config;
use crate::memory::ChatMessage;
use crate::Result;

/// Stream of LLM text tokens; arbitrary substrings concatenating to the full
/// response
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream of self-describing audio chunks (MP3 frames by default)
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Turns an audio blob into a finalized transcript
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe raw PCM Int16 LE mono 16 kHz audio
    ///
    /// Returns an empty string when the vendor hears no speech.
    async fn transcribe(&self, pcm: &[u8], language_hint: &str) -> Result<String>;
}

/// Streams a chat completion token by token
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Open a streaming completion for the given messages
    ///
    /// Dropping the returned stream closes the underlying HTTP stream.
    async fn stream_reply(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}

/// Streams synthesized speech for one sentence
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Open a streaming synthesis request
    ///
    /// Dropping the returned stream closes the underlying HTTP stream.
    async fn stream_speech(&self, text: &str) -> Result<AudioStream>;
}

/// The shared vendor client bundle
///
/// Stateless and safe for concurrent use; the only artifact shared between
/// sessions.
#[derive(Clone)]
pub struct ExternalClients {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesis>,
}

impl ExternalClients {
    /// Wire up the production vendor clients from configuration
    ///
    /// # Errors
    ///
    /// Returns error if any credential is empty
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            stt: Arc::new(SarvamStt::new(config.sarvam_api_key.clone())?),
            llm: Arc::new(OpenAiLlm::new(config.openai_api_key.clone())?),
            tts: Arc::new(ElevenLabsTts::new(
                config.elevenlabs_api_key.clone(),
                config.elevenlabs_voice_id.clone(),
            )?),
        })
    }
}
