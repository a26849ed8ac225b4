//! Task-aware model selection
//!
//! Maps a task type to a ranked list of model configurations and filters by
//! caller constraints. Selection never fails: an unknown task falls back to
//! the required "general" entry, and over-constrained requests fall back to
//! the cheapest candidate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use companion_config::LlmSettings;

pub const GENERAL_TASK: &str = "general";

/// One selectable model with its routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub cost_per_1k_tokens: f32,
    pub context_window: u32,
    pub latency_ms: u32,
}

/// Caller-supplied selection constraints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionConstraints {
    /// Upper bound on cost per 1k tokens
    pub max_cost_per_1k_tokens: Option<f32>,
    /// Upper bound on expected latency
    pub max_latency_ms: Option<u32>,
}

/// Task-type to model-list routing table.
pub struct ModelSelector {
    table: HashMap<String, Vec<ModelConfig>>,
}

impl ModelSelector {
    pub fn new(table: HashMap<String, Vec<ModelConfig>>) -> Self {
        Self { table }
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        let table = settings
            .models
            .iter()
            .map(|(task, entries)| {
                let configs = entries
                    .iter()
                    .map(|e| ModelConfig {
                        provider: e.provider.clone(),
                        model: e.model.clone(),
                        max_tokens: e.max_tokens,
                        temperature: e.temperature,
                        cost_per_1k_tokens: e.cost_per_1k_tokens,
                        context_window: e.context_window,
                        latency_ms: e.latency_ms,
                    })
                    .collect();
                (task.clone(), configs)
            })
            .collect();
        Self { table }
    }

    /// Pick a model for the task. Unknown tasks use the "general" list;
    /// candidates violating the constraints are dropped, and if none remain
    /// the cheapest candidate wins anyway.
    pub fn select(
        &self,
        task_type: Option<&str>,
        constraints: Option<&SelectionConstraints>,
    ) -> ModelConfig {
        let task = task_type.unwrap_or(GENERAL_TASK);
        let candidates = self
            .table
            .get(task)
            .filter(|c| !c.is_empty())
            .or_else(|| self.table.get(GENERAL_TASK))
            .map(|c| c.as_slice())
            .unwrap_or(&[]);

        if candidates.is_empty() {
            // Settings validation requires a non-empty "general" list, so
            // this only happens with a hand-built empty table.
            return ModelConfig {
                provider: "offline".to_string(),
                model: "offline".to_string(),
                max_tokens: 256,
                temperature: 0.7,
                cost_per_1k_tokens: 0.0,
                context_window: 4096,
                latency_ms: 0,
            };
        }

        if let Some(constraints) = constraints {
            let eligible: Vec<&ModelConfig> = candidates
                .iter()
                .filter(|c| {
                    constraints
                        .max_cost_per_1k_tokens
                        .map_or(true, |max| c.cost_per_1k_tokens <= max)
                        && constraints
                            .max_latency_ms
                            .map_or(true, |max| c.latency_ms <= max)
                })
                .collect();
            if let Some(first) = eligible.first() {
                return (*first).clone();
            }
            tracing::debug!(task, "no model satisfies constraints, using cheapest");
            return cheapest(candidates).clone();
        }

        candidates[0].clone()
    }
}

fn cheapest(candidates: &[ModelConfig]) -> &ModelConfig {
    let mut best = &candidates[0];
    for c in &candidates[1..] {
        if c.cost_per_1k_tokens < best.cost_per_1k_tokens {
            best = c;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, model: &str, cost: f32, latency: u32) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model: model.to_string(),
            max_tokens: 512,
            temperature: 0.7,
            cost_per_1k_tokens: cost,
            context_window: 8192,
            latency_ms: latency,
        }
    }

    fn selector() -> ModelSelector {
        let mut table = HashMap::new();
        table.insert(
            "general".to_string(),
            vec![
                config("openai", "gpt-4o-mini", 0.15, 800),
                config("ollama", "qwen3:4b", 0.0, 1500),
            ],
        );
        table.insert(
            "creative_writing".to_string(),
            vec![config("openai", "gpt-4o", 2.5, 1200)],
        );
        ModelSelector::new(table)
    }

    #[test]
    fn task_table_lookup() {
        let choice = selector().select(Some("creative_writing"), None);
        assert_eq!(choice.model, "gpt-4o");
    }

    #[test]
    fn unknown_task_falls_back_to_general() {
        let choice = selector().select(Some("interpretive_dance"), None);
        assert_eq!(choice.model, "gpt-4o-mini");
    }

    #[test]
    fn no_task_uses_general() {
        assert_eq!(selector().select(None, None).model, "gpt-4o-mini");
    }

    #[test]
    fn constraints_filter_candidates() {
        let constraints = SelectionConstraints {
            max_cost_per_1k_tokens: Some(0.05),
            max_latency_ms: None,
        };
        let choice = selector().select(None, Some(&constraints));
        assert_eq!(choice.provider, "ollama");
    }

    #[test]
    fn over_constrained_falls_back_to_cheapest() {
        let constraints = SelectionConstraints {
            max_cost_per_1k_tokens: Some(0.0),
            max_latency_ms: Some(1),
        };
        let choice = selector().select(Some("creative_writing"), Some(&constraints));
        // Only candidate costs 2.5 and is too slow; cheapest wins anyway.
        assert_eq!(choice.model, "gpt-4o");
    }

    #[test]
    fn latency_constraint_applies() {
        let constraints = SelectionConstraints {
            max_cost_per_1k_tokens: None,
            max_latency_ms: Some(1000),
        };
        let choice = selector().select(None, Some(&constraints));
        assert_eq!(choice.model, "gpt-4o-mini");
    }
}
