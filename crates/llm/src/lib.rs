//! Language-model orchestration
//!
//! Features:
//! - Multiple backend support (OpenAI-compatible, Ollama, offline fallback)
//! - Hybrid response cache with single-flight deduplication
//! - Task-aware model selection with cost/latency constraints
//! - Circuit-breaking provider fallback via the core provider chain

pub mod backends;
pub mod cache;
pub mod orchestrator;
pub mod selector;
pub mod types;
pub mod validation;

pub use backends::{OfflineResponder, OllamaBackend, OpenAiBackend};
pub use cache::ResponseCache;
pub use orchestrator::{LlmOrchestrator, UsageSnapshot};
pub use selector::{ModelConfig, ModelSelector, SelectionConstraints};
pub use types::{GenerationRequest, LlmResponse};
pub use validation::ParameterValidationService;

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}
