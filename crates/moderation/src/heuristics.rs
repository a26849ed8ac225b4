//! Secondary heuristic checks
//!
//! Catches high-signal risk phrases that no discrete rule covers, such as
//! secrecy and location probes or distress signals. Each probe carries a
//! weight; only probes at or above the configured threshold trigger.

use crate::rules::{Category, Severity};

/// A heuristic hit on a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicSignal {
    pub category: Category,
    pub severity: Severity,
    pub score: f32,
    pub phrase: String,
}

struct Probe {
    phrase: &'static str,
    weight: f32,
    category: Category,
    severity: Severity,
}

const PROBES: &[Probe] = &[
    // Secrecy and grooming probes
    Probe {
        phrase: "don't tell your parents",
        weight: 0.95,
        category: Category::PersonalInfo,
        severity: Severity::High,
    },
    Probe {
        phrase: "our little secret",
        weight: 0.9,
        category: Category::PersonalInfo,
        severity: Severity::High,
    },
    Probe {
        phrase: "where do you live",
        weight: 0.9,
        category: Category::PersonalInfo,
        severity: Severity::High,
    },
    Probe {
        phrase: "are you home alone",
        weight: 0.95,
        category: Category::PersonalInfo,
        severity: Severity::High,
    },
    Probe {
        phrase: "send me a picture",
        weight: 0.9,
        category: Category::PersonalInfo,
        severity: Severity::High,
    },
    Probe {
        phrase: "what school do you go to",
        weight: 0.85,
        category: Category::PersonalInfo,
        severity: Severity::High,
    },
    // Distress signals
    Probe {
        phrase: "i want to die",
        weight: 0.95,
        category: Category::SelfHarm,
        severity: Severity::Critical,
    },
    Probe {
        phrase: "hurt myself",
        weight: 0.9,
        category: Category::SelfHarm,
        severity: Severity::Critical,
    },
    Probe {
        phrase: "everyone hates me",
        weight: 0.75,
        category: Category::Bullying,
        severity: Severity::Medium,
    },
    Probe {
        phrase: "run away from home",
        weight: 0.8,
        category: Category::AgeInappropriate,
        severity: Severity::High,
    },
];

/// Weighted risk-phrase scorer applied when the rule engine finds nothing.
pub struct HeuristicAnalyzer {
    threshold: f32,
}

impl HeuristicAnalyzer {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Case-insensitive scan; returns every probe at or above the threshold.
    pub fn assess(&self, text: &str) -> Vec<HeuristicSignal> {
        let text_lower = text.to_lowercase();
        PROBES
            .iter()
            .filter(|p| p.weight >= self.threshold && text_lower.contains(p.phrase))
            .map(|p| HeuristicSignal {
                category: p.category,
                severity: p.severity,
                score: p.weight,
                phrase: p.phrase.to_string(),
            })
            .collect()
    }
}

impl Default for HeuristicAnalyzer {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrecy_probe_triggers() {
        let analyzer = HeuristicAnalyzer::default();
        let signals = analyzer.assess("This is our little secret, okay?");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].category, Category::PersonalInfo);
        assert_eq!(signals[0].severity, Severity::High);
    }

    #[test]
    fn benign_text_is_clean() {
        let analyzer = HeuristicAnalyzer::default();
        assert!(analyzer.assess("Tell me a story about a friendly dragon").is_empty());
    }

    #[test]
    fn threshold_filters_weak_probes() {
        let analyzer = HeuristicAnalyzer::new(0.8);
        // "everyone hates me" weighs 0.75 and must not trigger at 0.8
        assert!(analyzer.assess("everyone hates me").is_empty());
        assert!(!HeuristicAnalyzer::new(0.7)
            .assess("everyone hates me")
            .is_empty());
    }

    #[test]
    fn distress_signal_is_critical() {
        let analyzer = HeuristicAnalyzer::default();
        let signals = analyzer.assess("sometimes I want to die");
        assert_eq!(signals[0].severity, Severity::Critical);
    }
}
