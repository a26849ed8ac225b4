//! Content moderation for child-facing conversations
//!
//! A rule engine evaluates each message against keyword and pattern rules
//! filtered by age and language; a secondary heuristic layer catches
//! high-signal risk phrases no discrete rule covers. The service aggregates
//! matches into a single decision and fails closed: an internal error is
//! never allowed to let content through unmoderated.

pub mod heuristics;
pub mod rules;
pub mod service;
pub mod tracker;

pub use heuristics::{HeuristicAnalyzer, HeuristicSignal};
pub use rules::{Category, ModerationRule, RuleAction, RuleEngine, RuleMatch, Severity};
pub use service::{AlertSink, ModerationResult, ModerationService, ParentAlert};
pub use tracker::ViolationTracker;

use thiserror::Error;

/// Moderation errors
#[derive(Error, Debug)]
pub enum ModerationError {
    #[error("invalid rule `{rule_id}`: {message}")]
    InvalidRule { rule_id: String, message: String },

    #[error("failed to read rule set: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse rule set: {0}")]
    Parse(#[from] serde_yaml::Error),
}
