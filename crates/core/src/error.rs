//! Shared error taxonomy
//!
//! Four of the five failure kinds the pipeline distinguishes live here;
//! moderation blocks are deliberately absent because a blocked message is a
//! normal outcome carried by `ModerationResult`, not an error.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors shared across the companion crates.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request parameters, rejected before any external call.
    /// Always names the offending field.
    #[error("invalid parameter `{field}`: {message}")]
    Validation { field: String, message: String },

    /// Upstream provider failure. The provider chain absorbs these via
    /// fallback; they only surface in logs and `ProviderResult::error`.
    #[error("provider `{provider}` failed: {message}")]
    Provider { provider: String, message: String },

    /// A provider call exceeded its bounded timeout. Treated identically to
    /// an explicit failure for circuit-breaker purposes.
    #[error("provider `{provider}` timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    /// Remote cache tier failure. The request proceeds with local caching.
    #[error("cache backing store unavailable: {0}")]
    CacheUnavailable(String),

    /// Invalid or missing configuration detected at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other unexpected internal failure, tagged with a correlation id
    /// for operational follow-up.
    #[error("pipeline fault [{correlation_id}]: {message}")]
    Pipeline {
        correlation_id: Uuid,
        message: String,
    },
}

impl Error {
    /// Wrap an unexpected internal failure with a fresh correlation id.
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            correlation_id: Uuid::new_v4(),
            message: message.into(),
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
