//! Main settings module

use std::collections::HashMap;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Runtime environment enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Moderation configuration
    #[serde(default)]
    pub moderation: ModerationSettings,

    /// Language-model orchestration configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// Voice provider configuration
    #[serde(default)]
    pub voice: VoiceSettings,

    /// Circuit-breaker tuning shared by both provider chains
    #[serde(default)]
    pub breaker: BreakerSettings,
}

/// Moderation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationSettings {
    /// Optional YAML rule-set file; built-in defaults are used when unset
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Heuristic risk score at or above which the secondary checks flag
    /// content that no discrete rule matched
    #[serde(default = "default_heuristic_threshold")]
    pub heuristic_threshold: f32,

    /// Ages at or below this always get the scary-content rules applied
    #[serde(default = "default_young_child_age")]
    pub young_child_age: u8,

    /// Per-severity violation counts within the tracking window that
    /// trigger a parent alert
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,

    /// Sliding window for violation tracking, in seconds
    #[serde(default = "default_alert_window_secs")]
    pub alert_window_secs: u64,
}

fn default_heuristic_threshold() -> f32 {
    0.7
}

fn default_young_child_age() -> u8 {
    8
}

fn default_alert_window_secs() -> u64 {
    3600
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            rules_path: None,
            heuristic_threshold: default_heuristic_threshold(),
            young_child_age: default_young_child_age(),
            alert_thresholds: AlertThresholds::default(),
            alert_window_secs: default_alert_window_secs(),
        }
    }
}

/// Violation counts per severity that trigger a parent alert within the
/// tracking window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_low_threshold")]
    pub low: u32,
    #[serde(default = "default_medium_threshold")]
    pub medium: u32,
    #[serde(default = "default_high_threshold")]
    pub high: u32,
    #[serde(default = "default_high_threshold")]
    pub critical: u32,
}

fn default_low_threshold() -> u32 {
    5
}

fn default_medium_threshold() -> u32 {
    3
}

fn default_high_threshold() -> u32 {
    1
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            low: default_low_threshold(),
            medium: default_medium_threshold(),
            high: default_high_threshold(),
            critical: default_high_threshold(),
        }
    }
}

/// Language-model orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Provider used when neither the request nor the task table names one
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Write-through cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Local cache tier capacity (entries)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Bounded timeout for a single provider call, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Ranked generation providers
    #[serde(default = "default_llm_providers")]
    pub providers: Vec<LlmProviderSettings>,

    /// Model lookup table keyed by task type ("general", "creative_writing",
    /// "analysis", ...)
    #[serde(default = "default_model_table")]
    pub models: HashMap<String, Vec<ModelEntry>>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_call_timeout_secs() -> u64 {
    5
}

fn default_llm_providers() -> Vec<LlmProviderSettings> {
    vec![
        LlmProviderSettings {
            name: "openai".to_string(),
            priority: 0,
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            enabled: true,
        },
        LlmProviderSettings {
            name: "ollama".to_string(),
            priority: 1,
            endpoint: "http://localhost:11434".to_string(),
            api_key_env: String::new(),
            model: "qwen3:4b-instruct-2507-q4_K_M".to_string(),
            enabled: true,
        },
    ]
}

fn default_model_table() -> HashMap<String, Vec<ModelEntry>> {
    let mut table = HashMap::new();
    table.insert(
        "general".to_string(),
        vec![
            ModelEntry {
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 512,
                temperature: 0.7,
                cost_per_1k_tokens: 0.002,
                context_window: 128_000,
                latency_ms: 800,
            },
            ModelEntry {
                provider: "ollama".to_string(),
                model: "qwen3:4b-instruct-2507-q4_K_M".to_string(),
                max_tokens: 512,
                temperature: 0.7,
                cost_per_1k_tokens: 0.0,
                context_window: 32_768,
                latency_ms: 400,
            },
        ],
    );
    table.insert(
        "creative_writing".to_string(),
        vec![ModelEntry {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.8,
            cost_per_1k_tokens: 0.015,
            context_window: 128_000,
            latency_ms: 1500,
        }],
    );
    table.insert(
        "analysis".to_string(),
        vec![ModelEntry {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1024,
            temperature: 0.3,
            cost_per_1k_tokens: 0.015,
            context_window: 128_000,
            latency_ms: 1500,
        }],
    );
    table
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            call_timeout_secs: default_call_timeout_secs(),
            providers: default_llm_providers(),
            models: default_model_table(),
        }
    }
}

/// One ranked generation provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderSettings {
    pub name: String,
    pub priority: u8,
    pub endpoint: String,
    /// Environment variable holding the API key (empty = no key needed)
    #[serde(default)]
    pub api_key_env: String,
    /// Default model when the selector's choice is unavailable
    pub model: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A model configuration candidate for the selector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub cost_per_1k_tokens: f32,
    pub context_window: u32,
    /// Declared typical latency, used by selection constraints
    pub latency_ms: u32,
}

/// Voice provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Bounded timeout for a single provider call, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Ranked voice providers
    #[serde(default = "default_voice_providers")]
    pub providers: Vec<VoiceProviderSettings>,
}

fn default_voice_providers() -> Vec<VoiceProviderSettings> {
    vec![
        VoiceProviderSettings {
            name: "elevenlabs".to_string(),
            priority: 0,
            endpoint: "https://api.elevenlabs.io".to_string(),
            api_key_env: "ELEVENLABS_API_KEY".to_string(),
            capabilities: vec!["synthesis".to_string()],
            voice_id: "EXAVITQu4vr4xnSDxMaL".to_string(),
        },
        VoiceProviderSettings {
            name: "azure".to_string(),
            priority: 1,
            endpoint: "https://eastus.api.cognitive.microsoft.com".to_string(),
            api_key_env: "AZURE_SPEECH_KEY".to_string(),
            capabilities: vec!["transcription".to_string(), "synthesis".to_string()],
            voice_id: "en-US-JennyNeural".to_string(),
        },
    ]
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            providers: default_voice_providers(),
        }
    }
}

/// One ranked voice provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProviderSettings {
    pub name: String,
    pub priority: u8,
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: String,
    /// Declared capabilities: "transcription" and/or "synthesis"
    pub capabilities: Vec<String>,
    /// Provider-specific voice identifier
    #[serde(default)]
    pub voice_id: String,
}

/// Circuit-breaker tuning shared by both provider chains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before a provider's circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cooldown before an open circuit permits a trial call, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from an optional file plus `COMPANION_*` environment
    /// overrides (e.g. `COMPANION_BREAKER__COOLDOWN_SECS=30`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix("COMPANION").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.moderation.heuristic_threshold) {
            return Err(ConfigError::invalid(
                "moderation.heuristic_threshold",
                format!(
                    "must be between 0.0 and 1.0, got {}",
                    self.moderation.heuristic_threshold
                ),
            ));
        }

        if self.llm.cache_max_entries == 0 {
            return Err(ConfigError::invalid(
                "llm.cache_max_entries",
                "must be at least 1",
            ));
        }

        if self.llm.call_timeout_secs == 0 || self.voice.call_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "call_timeout_secs",
                "must be at least 1 second",
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "breaker.failure_threshold",
                "must be at least 1",
            ));
        }

        if !self.llm.models.contains_key("general") {
            return Err(ConfigError::invalid(
                "llm.models",
                "the \"general\" task entry is required as the selection fallback",
            ));
        }

        for entry in self.llm.models.values().flatten() {
            if !(0.0..=2.0).contains(&entry.temperature) {
                return Err(ConfigError::invalid(
                    "llm.models.temperature",
                    format!("must be between 0.0 and 2.0, got {}", entry.temperature),
                ));
            }
        }

        for provider in &self.voice.providers {
            for cap in &provider.capabilities {
                if cap != "transcription" && cap != "synthesis" {
                    return Err(ConfigError::invalid(
                        "voice.providers.capabilities",
                        format!("unknown capability `{cap}` for `{}`", provider.name),
                    ));
                }
            }
        }

        Ok(())
    }
}
