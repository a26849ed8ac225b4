//! Capability traits implemented by pluggable backends

mod cache;
mod generation;
mod speech;

pub use cache::CacheStore;
pub use generation::{GenerationBackend, GenerationOutput, GenerationParams};
pub use speech::VoiceBackend;
