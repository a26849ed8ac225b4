//! Offline voice fallback
//!
//! Terminal provider for the voice chain. Synthesis produces a short,
//! locally generated chime so the device still responds audibly when every
//! speech service is down; transcription yields an empty string, which the
//! pipeline treats as "nothing understood".

use std::io::Cursor;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};

use companion_core::{
    AudioClip, AudioEncoding, Emotion, Error as CoreError, Language, Result, VoiceBackend,
};

const SAMPLE_RATE: u32 = 16_000;
const CHIME_HZ: f32 = 440.0;
const CHIME_SECS: f32 = 0.6;

/// Terminal fallback voice provider. Cannot fail.
pub struct OfflineVoice;

impl OfflineVoice {
    fn chime() -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)
                .map_err(|e| CoreError::provider("offline", e.to_string()))?;
            let total = (SAMPLE_RATE as f32 * CHIME_SECS) as u32;
            for n in 0..total {
                let t = n as f32 / SAMPLE_RATE as f32;
                // Fade out so the tone does not click at the end
                let envelope = 1.0 - (n as f32 / total as f32);
                let sample = (t * CHIME_HZ * 2.0 * std::f32::consts::PI).sin() * envelope * 0.3;
                writer
                    .write_sample((sample * i16::MAX as f32) as i16)
                    .map_err(|e| CoreError::provider("offline", e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| CoreError::provider("offline", e.to_string()))?;
        }
        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl VoiceBackend for OfflineVoice {
    async fn transcribe(&self, _audio: &AudioClip, _language: Language) -> Result<String> {
        Ok(String::new())
    }

    async fn synthesize(
        &self,
        _text: &str,
        _emotion: Emotion,
        _language: Language,
    ) -> Result<AudioClip> {
        Ok(AudioClip::new(
            Self::chime()?,
            AudioEncoding::Pcm16Wav,
            SAMPLE_RATE,
        ))
    }

    fn name(&self) -> &str {
        "offline"
    }
}
