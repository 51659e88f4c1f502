//! Configuration for the Parley gateway
//!
//! Built explicitly at startup, after `.env` has been loaded. Credentials are
//! handed to the vendor clients by constructor; nothing reads the environment
//! at request time.

use std::path::PathBuf;

use crate::silence::SilenceConfig;
use crate::{Error, Result};

/// Default ElevenLabs voice when `ELEVENLABS_VOICE_ID` is unset
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,

    /// Sarvam STT credential
    pub sarvam_api_key: String,

    /// OpenAI LLM credential
    pub openai_api_key: String,

    /// ElevenLabs TTS credential
    pub elevenlabs_api_key: String,

    /// ElevenLabs voice selector
    pub elevenlabs_voice_id: String,

    /// Voice-activity detection tuning
    pub silence: SilenceConfig,

    /// Directory with the browser shell, served at `/`; None disables it
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Build configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns error if a required credential is missing or a placeholder
    pub fn from_env() -> Result<Self> {
        let sarvam_api_key = require_env("SARVAM_API_KEY")?;
        let openai_api_key = require_env("OPENAI_API_KEY")?;
        let elevenlabs_api_key = require_env("ELEVENLABS_API_KEY")?;

        let elevenlabs_voice_id = std::env::var("ELEVENLABS_VOICE_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string());

        let static_dir = Some(PathBuf::from("frontend")).filter(|dir| dir.is_dir());

        Ok(Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            sarvam_api_key,
            openai_api_key,
            elevenlabs_api_key,
            elevenlabs_voice_id,
            silence: SilenceConfig::default(),
            static_dir,
        })
    }
}

/// Fetch a required credential, rejecting empty values and untouched
/// `.env.example` placeholders
fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.starts_with("your_"))
        .ok_or_else(|| Error::Config(format!("{name} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_credential_is_rejected() {
        // SAFETY NOTE: env mutation is process-wide; this test owns a name no
        // other test touches
        std::env::set_var("PARLEY_TEST_PLACEHOLDER_KEY", "your_api_key_here");
        assert!(require_env("PARLEY_TEST_PLACEHOLDER_KEY").is_err());
        std::env::remove_var("PARLEY_TEST_PLACEHOLDER_KEY");
    }

    #[test]
    fn missing_credential_is_rejected() {
        assert!(require_env("PARLEY_TEST_DEFINITELY_UNSET").is_err());
    }

    #[test]
    fn set_credential_is_trimmed() {
        std::env::set_var("PARLEY_TEST_SET_KEY", "  secret-value  ");
        assert_eq!(require_env("PARLEY_TEST_SET_KEY").unwrap(), "secret-value");
        std::env::remove_var("PARLEY_TEST_SET_KEY");
    }
}
