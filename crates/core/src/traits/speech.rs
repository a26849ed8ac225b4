//! Voice provider trait
//!
//! A single trait covers both voice capabilities; the provider chain filters
//! by declared capability, so a synthesis-only provider is never asked to
//! transcribe.

use async_trait::async_trait;

use crate::audio::{AudioClip, Emotion};
use crate::error::Result;
use crate::language::Language;

/// Abstract voice capabilities: `transcribe(audio, language) -> text` and
/// `synthesize(text, emotion, language) -> audio`.
///
/// Implementations:
/// - `AzureSpeechBackend` - REST speech service, both capabilities
/// - `ElevenLabsBackend` - synthesis only
/// - `OfflineVoice` - terminal fallback, cannot fail
#[async_trait]
pub trait VoiceBackend: Send + Sync + 'static {
    async fn transcribe(&self, audio: &AudioClip, language: Language) -> Result<String>;

    async fn synthesize(
        &self,
        text: &str,
        emotion: Emotion,
        language: Language,
    ) -> Result<AudioClip>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
