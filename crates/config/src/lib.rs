//! Configuration surface for the companion pipeline
//!
//! Recognized options: rule-set source, provider priority lists per
//! capability, circuit-breaker threshold/cooldown, cache TTL/size, default
//! model configs per task type, and age-appropriateness thresholds.

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{
    AlertThresholds, BreakerSettings, LlmProviderSettings, LlmSettings, ModelEntry,
    ModerationSettings, RuntimeEnvironment, Settings, VoiceProviderSettings, VoiceSettings,
};
