//! Generation backend implementations
//!
//! OpenAI-compatible chat completions, Ollama for local models, and a
//! terminal offline responder that never fails. API keys are read from the
//! environment at construction, never stored in configuration files.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use companion_core::{
    Error as CoreError, GenerationBackend, GenerationOutput, GenerationParams, Message, Result,
    Role,
};
use companion_config::LlmProviderSettings;

use crate::LlmError;

/// Rough token estimate for multilingual content. Arabic script runs about
/// two graphemes per token, Latin about four.
pub fn estimate_tokens(text: &str) -> u32 {
    use unicode_segmentation::UnicodeSegmentation;

    let grapheme_count = text.graphemes(true).count();
    let arabic_count = text
        .chars()
        .filter(|c| ('\u{0600}'..='\u{06FF}').contains(c))
        .count();

    let estimate = if arabic_count > grapheme_count / 3 {
        grapheme_count.max(1) / 2
    } else {
        grapheme_count.max(1) / 4
    };
    estimate.max(1) as u32
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    default_model: String,
    name: String,
}

impl OpenAiBackend {
    pub fn new(settings: &LlmProviderSettings, timeout: Duration) -> Result<Self> {
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
            default_model: settings.model.clone(),
            name: settings.name.clone(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    async fn execute(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> std::result::Result<GenerationOutput, LlmError> {
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let request = OpenAiChatRequest {
            model: model.clone(),
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: role_str(m.role).to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: Some(params.max_tokens),
            temperature: Some(params.temperature),
            stream: Some(false),
        };

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        let response: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let tokens_used = response
            .usage
            .map(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&choice.message.content));

        Ok(GenerationOutput {
            content: choice.message.content,
            model: response.model.unwrap_or(model),
            tokens_used,
        })
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<GenerationOutput> {
        self.execute(messages, params)
            .await
            .map_err(|e| CoreError::provider(&self.name, e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Ollama chat backend for locally hosted models.
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    default_model: String,
    name: String,
}

impl OllamaBackend {
    pub fn new(settings: &LlmProviderSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            default_model: settings.model.clone(),
            name: settings.name.clone(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }

    async fn execute(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> std::result::Result<GenerationOutput, LlmError> {
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let request = OllamaChatRequest {
            model: model.clone(),
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: role_str(m.role).to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            options: OllamaOptions {
                temperature: Some(params.temperature),
                num_predict: Some(params.max_tokens as i32),
            },
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {body}")));
            }
            return Err(LlmError::Api(body));
        }

        let response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let tokens_used = response
            .eval_count
            .map(|n| n as u32)
            .unwrap_or_else(|| estimate_tokens(&response.message.content));

        Ok(GenerationOutput {
            content: response.message.content,
            model,
            tokens_used,
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<GenerationOutput> {
        self.execute(messages, params)
            .await
            .map_err(|e| CoreError::provider(&self.name, e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Terminal fallback: a gentle canned reply, produced locally. Cannot fail.
pub struct OfflineResponder;

pub const OFFLINE_REPLY: &str =
    "I'm having a little trouble thinking right now. Can we try that again in a moment?";

#[async_trait]
impl GenerationBackend for OfflineResponder {
    async fn generate(
        &self,
        _messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<GenerationOutput> {
        Ok(GenerationOutput {
            content: OFFLINE_REPLY.to_string(),
            model: "offline".to_string(),
            tokens_used: estimate_tokens(OFFLINE_REPLY),
        })
    }

    fn name(&self) -> &str {
        "offline"
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    completion_tokens: u32,
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ApiMessage,
    #[serde(default)]
    eval_count: Option<u64>,
}
