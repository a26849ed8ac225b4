//! Conversation turn pipeline
//!
//! Drives one child-companion exchange through its fixed stage order:
//! input moderation, generation, output moderation, synthesis, assembly.
//! Unsafe input short-circuits before any provider is called; an internal
//! fault never reaches the device as an error, only as a safe fallback
//! reply tagged with a correlation id.

pub mod cancel;
pub mod telemetry;
pub mod turn;

pub use cancel::CancelToken;
pub use telemetry::init_tracing;
pub use turn::{ConversationTurnPipeline, ConversationTurnResult, StageTimings, TurnRequest};
