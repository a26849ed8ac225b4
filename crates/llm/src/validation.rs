//! Request parameter validation
//!
//! Applied before any provider call or cache lookup; the first violation
//! short-circuits with a field-level error.

use companion_core::{Error, Result};

use crate::types::GenerationRequest;

pub const MAX_TOKENS_LIMIT: u32 = 8192;
pub const TEMPERATURE_LIMIT: f32 = 2.0;

/// Validates generation requests against hard parameter boundaries.
pub struct ParameterValidationService {
    known_providers: Vec<String>,
}

impl ParameterValidationService {
    pub fn new(known_providers: Vec<String>) -> Self {
        Self { known_providers }
    }

    pub fn validate(&self, request: &GenerationRequest) -> Result<()> {
        if request.conversation.is_empty() {
            return Err(Error::Validation {
                field: "conversation".to_string(),
                message: "conversation must contain at least one message".to_string(),
            });
        }

        if request.max_tokens == 0 || request.max_tokens > MAX_TOKENS_LIMIT {
            return Err(Error::Validation {
                field: "max_tokens".to_string(),
                message: format!(
                    "max_tokens must be between 1 and {}, got {}",
                    MAX_TOKENS_LIMIT, request.max_tokens
                ),
            });
        }

        if !request.temperature.is_finite()
            || request.temperature < 0.0
            || request.temperature > TEMPERATURE_LIMIT
        {
            return Err(Error::Validation {
                field: "temperature".to_string(),
                message: format!(
                    "temperature must be between 0.0 and {}, got {}",
                    TEMPERATURE_LIMIT, request.temperature
                ),
            });
        }

        if let Some(provider) = &request.provider {
            if !self.known_providers.iter().any(|p| p == provider) {
                return Err(Error::Validation {
                    field: "provider".to_string(),
                    message: format!("unknown provider `{provider}`"),
                });
            }
        }

        if let Some(model) = &request.model {
            if model.trim().is_empty() {
                return Err(Error::Validation {
                    field: "model".to_string(),
                    message: "model must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}
