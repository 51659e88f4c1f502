//! ElevenLabs streaming text-to-speech client

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{AudioStream, SpeechSynthesis};
use crate::{Error, Result};

const TTS_MODEL: &str = "eleven_turbo_v2_5";

/// Upper bound per synthesized sentence, including the streamed body
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Streams MP3 audio from ElevenLabs, one request per sentence
pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_key: String,
    voice_id: String,
}

impl ElevenLabsTts {
    /// Create a new TTS client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, voice_id: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice_id,
        })
    }
}

#[async_trait]
impl SpeechSynthesis for ElevenLabsTts {
    async fn stream_speech(&self, text: &str) -> Result<AudioStream> {
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}/stream",
            self.voice_id
        );

        let payload = serde_json::json!({
            "text": text,
            "model_id": TTS_MODEL,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
                "style": 0.0,
                "use_speaker_boost": true,
            },
        });

        tracing::debug!(chars = text.len(), "starting synthesis");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "ElevenLabs request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ElevenLabs API error");
            return Err(Error::Tts(format!("ElevenLabs API error {status}: {body}")));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Tts(e.to_string())))
            .filter(|chunk| {
                std::future::ready(chunk.as_ref().map_or(true, |bytes| !bytes.is_empty()))
            });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_api_key() {
        assert!(ElevenLabsTts::new(String::new(), "voice".to_string()).is_err());
    }
}
