//! ElevenLabs synthesis backend
//!
//! Synthesis only; the chain's capability filter keeps transcription
//! requests away from it. Emotion maps onto the voice-settings knobs the
//! API exposes (stability, similarity boost, style).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use companion_config::VoiceProviderSettings;
use companion_core::{
    AudioClip, AudioEncoding, Emotion, Error as CoreError, Language, Result, VoiceBackend,
};

use crate::VoiceError;

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
}

/// Emotion shaping: calm voices want high stability, excited ones want a
/// strong style exaggeration with lower stability.
fn settings_for(emotion: Emotion) -> VoiceSettings {
    match emotion {
        Emotion::Neutral => VoiceSettings {
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
        },
        Emotion::Happy => VoiceSettings {
            stability: 0.4,
            similarity_boost: 0.75,
            style: 0.5,
        },
        Emotion::Calm => VoiceSettings {
            stability: 0.8,
            similarity_boost: 0.75,
            style: 0.1,
        },
        Emotion::Excited => VoiceSettings {
            stability: 0.3,
            similarity_boost: 0.7,
            style: 0.8,
        },
        Emotion::Sad => VoiceSettings {
            stability: 0.7,
            similarity_boost: 0.75,
            style: 0.4,
        },
    }
}

/// ElevenLabs text-to-speech backend.
pub struct ElevenLabsBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    voice_id: String,
    name: String,
}

impl ElevenLabsBackend {
    pub fn new(settings: &VoiceProviderSettings, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            CoreError::Config(format!(
                "missing API key environment variable `{}`",
                settings.api_key_env
            ))
        })?;
        if settings.voice_id.is_empty() {
            return Err(CoreError::Config(
                "elevenlabs provider requires a voice_id".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key,
            voice_id: settings.voice_id.clone(),
            name: settings.name.clone(),
        })
    }

    fn tts_url(&self) -> String {
        format!("{}/v1/text-to-speech/{}", self.endpoint, self.voice_id)
    }

    async fn synthesize_inner(
        &self,
        text: &str,
        emotion: Emotion,
    ) -> std::result::Result<AudioClip, VoiceError> {
        let request = SynthesisRequest {
            text,
            // Multilingual model covers every supported language
            model_id: "eleven_multilingual_v2",
            voice_settings: settings_for(emotion),
        };

        let response = self
            .client
            .post(self.tts_url())
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Api(format!("HTTP {status}: {body}")));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(VoiceError::InvalidResponse("empty audio payload".to_string()));
        }
        Ok(AudioClip::new(bytes.to_vec(), AudioEncoding::Mp3, 44_100))
    }
}

#[async_trait]
impl VoiceBackend for ElevenLabsBackend {
    async fn transcribe(&self, _audio: &AudioClip, _language: Language) -> Result<String> {
        Err(CoreError::provider(
            &self.name,
            VoiceError::Unsupported("transcription").to_string(),
        ))
    }

    async fn synthesize(
        &self,
        text: &str,
        emotion: Emotion,
        _language: Language,
    ) -> Result<AudioClip> {
        self.synthesize_inner(text, emotion)
            .await
            .map_err(|e| CoreError::provider(&self.name, e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotion_shapes_voice_settings() {
        let calm = settings_for(Emotion::Calm);
        let excited = settings_for(Emotion::Excited);
        assert!(calm.stability > excited.stability);
        assert!(excited.style > calm.style);
    }

    #[test]
    fn synthesis_request_serialization() {
        let request = SynthesisRequest {
            text: "hello",
            model_id: "eleven_multilingual_v2",
            voice_settings: settings_for(Emotion::Happy),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("similarity_boost"));
        assert!(json.contains("eleven_multilingual_v2"));
    }

    #[tokio::test]
    async fn transcription_is_rejected() {
        let backend = ElevenLabsBackend {
            client: Client::new(),
            endpoint: "https://api.elevenlabs.io".to_string(),
            api_key: "test".to_string(),
            voice_id: "voice".to_string(),
            name: "elevenlabs".to_string(),
        };
        let clip = AudioClip::new(vec![0; 4], AudioEncoding::Pcm16Wav, 16_000);
        assert!(backend.transcribe(&clip, Language::English).await.is_err());
    }
}
