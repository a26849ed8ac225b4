//! Core traits and types for the companion pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Core traits for pluggable backends (generation, voice, cache store)
//! - Conversation message types
//! - Audio clip types for synthesis/transcription payloads
//! - The generic availability-aware provider chain with circuit breaking
//! - Error types

pub mod audio;
pub mod conversation;
pub mod error;
pub mod language;
pub mod provider;
pub mod traits;

pub use audio::{AudioClip, AudioEncoding, Emotion};
pub use conversation::{Message, Role};
pub use error::{Error, Result};
pub use language::Language;
pub use provider::{
    BreakerConfig, CircuitBreaker, CircuitState, ProviderCapability, ProviderChain,
    ProviderChainBuilder, ProviderResult,
};
pub use traits::{
    CacheStore, GenerationBackend, GenerationOutput, GenerationParams, VoiceBackend,
};
