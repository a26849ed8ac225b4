//! Speech providers
//!
//! Transcription and synthesis backends behind the core provider chain:
//! Azure Speech (both capabilities), ElevenLabs (synthesis only) and an
//! offline fallback that produces a locally generated comfort clip.

pub mod azure;
pub mod chain;
pub mod elevenlabs;
pub mod offline;

pub use azure::AzureSpeechBackend;
pub use chain::build_voice_chain;
pub use elevenlabs::ElevenLabsBackend;
pub use offline::OfflineVoice;

use thiserror::Error;

/// Voice provider errors
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("capability not supported: {0}")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::Network(err.to_string())
    }
}
