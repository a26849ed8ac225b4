//! Generation request and response types

use serde::{Deserialize, Serialize};

use companion_core::Message;

use crate::selector::SelectionConstraints;

/// One generation request flowing through the orchestrator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Conversation history, oldest first. Must not be empty.
    pub conversation: Vec<Message>,
    /// Preferred provider; validated against the configured set.
    pub provider: Option<String>,
    /// Explicit model override; selection fills this when absent.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub use_cache: bool,
    /// Task hint for model selection ("general" when absent)
    pub task_type: Option<String>,
    pub constraints: Option<SelectionConstraints>,
}

impl GenerationRequest {
    pub fn new(conversation: Vec<Message>) -> Self {
        Self {
            conversation,
            provider: None,
            model: None,
            max_tokens: 256,
            temperature: 0.7,
            use_cache: true,
            task_type: None,
            constraints: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Completed generation, as returned to the pipeline and stored in cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    /// Provider that actually served the request
    pub provider: String,
    pub model: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
    /// True when served from cache rather than a provider call
    pub cached: bool,
    /// True when the terminal offline responder produced the content
    pub degraded: bool,
}
