//! Sarvam speech-to-text client

use std::time::Duration;

use async_trait::async_trait;

use super::SpeechToText;
use crate::audio::{pcm_to_wav, SAMPLE_RATE};
use crate::{Error, Result};

const SARVAM_STT_URL: &str = "https://api.sarvam.ai/speech-to-text";

const STT_MODEL: &str = "saarika:v2.5";

/// Upper bound per transcription attempt
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Below 100 ms of audio the vendor returns garbage; treat as no speech
const MIN_AUDIO_BYTES: usize = 3200;

/// Response from the Sarvam transcription API
#[derive(serde::Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    transcript: String,
}

/// Transcribes speech via the Sarvam API
pub struct SarvamStt {
    client: reqwest::Client,
    api_key: String,
}

impl SarvamStt {
    /// Create a new STT client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Sarvam API key required for STT".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

#[async_trait]
impl SpeechToText for SarvamStt {
    async fn transcribe(&self, pcm: &[u8], language_hint: &str) -> Result<String> {
        if pcm.len() < MIN_AUDIO_BYTES {
            tracing::warn!(bytes = pcm.len(), "audio too short to transcribe");
            return Ok(String::new());
        }

        let wav = pcm_to_wav(pcm, SAMPLE_RATE)?;
        tracing::debug!(
            pcm_bytes = pcm.len(),
            wav_bytes = wav.len(),
            "starting transcription"
        );

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", STT_MODEL)
            .text("language_code", language_hint.to_string());

        let response = self
            .client
            .post(SARVAM_STT_URL)
            .header("api-subscription-key", &self.api_key)
            .multipart(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Sarvam request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Sarvam API error");
            return Err(Error::Stt(format!("Sarvam API error {status}: {body}")));
        }

        let result: TranscribeResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Sarvam response");
            e
        })?;

        let transcript = result.transcript.trim().to_string();
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::SpeechToText as _;

    #[test]
    fn rejects_empty_api_key() {
        assert!(SarvamStt::new(String::new()).is_err());
    }

    #[tokio::test]
    async fn short_audio_is_treated_as_no_speech() {
        let stt = SarvamStt::new("key".to_string()).unwrap();
        // 50 ms of audio, below the 100 ms floor; no request is made
        let transcript = stt.transcribe(&vec![0u8; 1600], "en-IN").await.unwrap();
        assert_eq!(transcript, "");
    }

    #[test]
    fn response_parsing_defaults_missing_transcript() {
        let parsed: TranscribeResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.transcript, "");

        let parsed: TranscribeResponse =
            serde_json::from_str(r#"{"transcript":" hello ","language_code":"en-IN"}"#).unwrap();
        assert_eq!(parsed.transcript, " hello ");
    }
}
