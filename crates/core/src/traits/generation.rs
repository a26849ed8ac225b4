//! Language-model generation trait

use async_trait::async_trait;

use crate::conversation::Message;
use crate::error::Result;

/// Per-call generation parameters resolved by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    /// Model to use; `None` lets the backend fall back to its configured
    /// default (fallback providers may not host the selected model).
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Output of a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub content: String,
    /// Model that actually produced the content
    pub model: String,
    pub tokens_used: u32,
}

/// Abstract capability: `generate(messages, params) -> content`.
///
/// Implementations:
/// - `OpenAiBackend` - OpenAI-compatible chat completions
/// - `OllamaBackend` - local models
/// - `OfflineResponder` - terminal fallback, cannot fail
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<GenerationOutput>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
