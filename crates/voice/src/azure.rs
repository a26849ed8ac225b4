//! Azure Speech REST backend
//!
//! Implements both transcription and synthesis against the Azure Speech
//! REST endpoints. Synthesis goes through SSML so emotion maps onto the
//! express-as style of the selected neural voice.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use companion_config::VoiceProviderSettings;
use companion_core::{
    AudioClip, AudioEncoding, Emotion, Error as CoreError, Language, Result, VoiceBackend,
};

use crate::VoiceError;

/// Azure requires full locales rather than bare ISO codes.
fn locale(language: Language) -> &'static str {
    match language {
        Language::English => "en-US",
        Language::Arabic => "ar-SA",
        Language::Spanish => "es-ES",
        Language::French => "fr-FR",
    }
}

/// Neural voice per language; overridable through settings.
fn default_voice(language: Language) -> &'static str {
    match language {
        Language::English => "en-US-JennyNeural",
        Language::Arabic => "ar-SA-ZariyahNeural",
        Language::Spanish => "es-ES-ElviraNeural",
        Language::French => "fr-FR-DeniseNeural",
    }
}

fn express_style(emotion: Emotion) -> &'static str {
    match emotion {
        Emotion::Neutral => "friendly",
        Emotion::Happy => "cheerful",
        Emotion::Calm => "gentle",
        Emotion::Excited => "excited",
        Emotion::Sad => "sad",
    }
}

#[derive(Debug, Deserialize)]
struct AzureSttResponse {
    #[serde(rename = "RecognitionStatus")]
    recognition_status: String,
    #[serde(rename = "DisplayText", default)]
    display_text: Option<String>,
}

/// Azure Speech backend, both capabilities.
pub struct AzureSpeechBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    voice_override: Option<String>,
    name: String,
}

impl AzureSpeechBackend {
    pub fn new(settings: &VoiceProviderSettings, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            CoreError::Config(format!(
                "missing API key environment variable `{}`",
                settings.api_key_env
            ))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key,
            voice_override: (!settings.voice_id.is_empty()).then(|| settings.voice_id.clone()),
            name: settings.name.clone(),
        })
    }

    fn stt_url(&self, language: Language) -> String {
        format!(
            "{}/speech/recognition/conversation/cognitiveservices/v1?language={}",
            self.endpoint,
            locale(language)
        )
    }

    fn tts_url(&self) -> String {
        format!("{}/cognitiveservices/v1", self.endpoint)
    }

    fn ssml(&self, text: &str, emotion: Emotion, language: Language) -> String {
        let voice = self
            .voice_override
            .as_deref()
            .unwrap_or_else(|| default_voice(language));
        format!(
            "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" \
             xmlns:mstts=\"https://www.w3.org/2001/mstts\" xml:lang=\"{}\">\
             <voice name=\"{}\"><mstts:express-as style=\"{}\">{}</mstts:express-as>\
             </voice></speak>",
            locale(language),
            voice,
            express_style(emotion),
            xml_escape(text)
        )
    }

    async fn transcribe_inner(
        &self,
        audio: &AudioClip,
        language: Language,
    ) -> std::result::Result<String, VoiceError> {
        let content_type = match audio.encoding {
            AudioEncoding::Pcm16Wav => {
                format!("audio/wav; codecs=audio/pcm; samplerate={}", audio.sample_rate)
            }
            AudioEncoding::Mp3 => {
                return Err(VoiceError::Unsupported("mp3 transcription input"));
            }
        };

        let response = self
            .client
            .post(self.stt_url(language))
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", content_type)
            .body(audio.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Api(format!("HTTP {status}: {body}")));
        }

        let parsed: AzureSttResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::InvalidResponse(e.to_string()))?;
        if parsed.recognition_status != "Success" {
            return Err(VoiceError::Api(format!(
                "recognition failed: {}",
                parsed.recognition_status
            )));
        }
        Ok(parsed.display_text.unwrap_or_default())
    }

    async fn synthesize_inner(
        &self,
        text: &str,
        emotion: Emotion,
        language: Language,
    ) -> std::result::Result<AudioClip, VoiceError> {
        let response = self
            .client
            .post(self.tts_url())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", "riff-16khz-16bit-mono-pcm")
            .body(self.ssml(text, emotion, language))
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
        Ok(AudioClip::new(
            bytes.to_vec(),
            AudioEncoding::Pcm16Wav,
            16_000,
        ))
    }
}

#[async_trait]
impl VoiceBackend for AzureSpeechBackend {
    async fn transcribe(&self, audio: &AudioClip, language: Language) -> Result<String> {
        self.transcribe_inner(audio, language)
            .await
            .map_err(|e| CoreError::provider(&self.name, e.to_string()))
    }

    async fn synthesize(
        &self,
        text: &str,
        emotion: Emotion,
        language: Language,
    ) -> Result<AudioClip> {
        self.synthesize_inner(text, emotion, language)
            .await
            .map_err(|e| CoreError::provider(&self.name, e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> AzureSpeechBackend {
        AzureSpeechBackend {
            client: Client::new(),
            endpoint: "https://westus.stt.speech.microsoft.com".to_string(),
            api_key: "test".to_string(),
            voice_override: None,
            name: "azure".to_string(),
        }
    }

    #[test]
    fn stt_url_carries_locale() {
        let url = backend().stt_url(Language::Arabic);
        assert!(url.contains("language=ar-SA"));
    }

    #[test]
    fn ssml_includes_style_and_voice() {
        let ssml = backend().ssml("hello there", Emotion::Happy, Language::English);
        assert!(ssml.contains("en-US-JennyNeural"));
        assert!(ssml.contains("style=\"cheerful\""));
        assert!(ssml.contains("hello there"));
    }

    #[test]
    fn ssml_escapes_markup() {
        let ssml = backend().ssml("fish & <chips>", Emotion::Neutral, Language::English);
        assert!(ssml.contains("fish &amp; &lt;chips&gt;"));
    }

    #[test]
    fn voice_override_wins() {
        let mut backend = backend();
        backend.voice_override = Some("en-US-AnaNeural".to_string());
        let ssml = backend.ssml("hi", Emotion::Calm, Language::English);
        assert!(ssml.contains("en-US-AnaNeural"));
    }
}
