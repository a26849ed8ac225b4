//! Audio payload types for transcription input and synthesis output

use serde::{Deserialize, Serialize};

/// Encoding of an audio clip's byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit PCM in a WAV container
    Pcm16Wav,
    Mp3,
}

/// An encoded audio clip moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, encoding: AudioEncoding, sample_rate: u32) -> Self {
        Self {
            bytes,
            encoding,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Emotional coloring requested from a synthesis provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Calm,
    Excited,
    Sad,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Calm => "calm",
            Emotion::Excited => "excited",
            Emotion::Sad => "sad",
        }
    }
}
