//! Moderation rules and the rule engine

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use companion_core::Language;

use crate::ModerationError;

/// Ordered risk level of a moderation match.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Nothing matched
    #[default]
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

/// Classification of flagged content.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Language,
    Violence,
    PersonalInfo,
    Bullying,
    ScaryContent,
    SelfHarm,
    AgeInappropriate,
}

/// What a triggered rule asks the service to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Block,
    Warn,
    Log,
}

/// A single moderation rule. Immutable after creation except `enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Case-insensitive substring keywords
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Regex pattern, used when `is_regex` is set
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub is_regex: bool,
    pub category: Category,
    pub severity: Severity,
    /// Inclusive age range the rule applies to
    #[serde(default = "default_age_range")]
    pub age_range: (u8, u8),
    /// Applicable languages; empty means all
    #[serde(default)]
    pub languages: Vec<Language>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// When false, a block on this rule always notifies the parent
    #[serde(default)]
    pub parent_override: bool,
    #[serde(default)]
    pub action: RuleAction,
}

fn default_age_range() -> (u8, u8) {
    (0, 18)
}

fn default_enabled() -> bool {
    true
}

/// One rule triggering on a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_id: String,
    pub category: Category,
    pub severity: Severity,
    pub matched_text: String,
}

#[derive(Debug)]
struct CompiledRule {
    rule: ModerationRule,
    pattern: Option<Regex>,
}

/// Evaluates messages against the rule set. Pure function over the rules
/// and input; no side effects, no I/O.
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<ModerationRule>) -> Result<Self, ModerationError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            compiled.push(Self::compile(rule)?);
        }
        Ok(Self { rules: compiled })
    }

    /// Built-in rule set covering the categories every deployment needs.
    pub fn with_default_rules() -> Result<Self, ModerationError> {
        Self::new(default_rules())
    }

    /// Load a rule set from a YAML document (a sequence of rules).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ModerationError> {
        let rules: Vec<ModerationRule> = serde_yaml::from_str(yaml)?;
        Self::new(rules)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ModerationError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    fn compile(rule: ModerationRule) -> Result<CompiledRule, ModerationError> {
        let pattern = match (&rule.pattern, rule.is_regex) {
            (Some(raw), true) => Some(
                RegexBuilder::new(raw)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ModerationError::InvalidRule {
                        rule_id: rule.id.clone(),
                        message: e.to_string(),
                    })?,
            ),
            _ => None,
        };
        Ok(CompiledRule { rule, pattern })
    }

    pub fn add_rule(&mut self, rule: ModerationRule) -> Result<(), ModerationError> {
        self.rules.push(Self::compile(rule)?);
        Ok(())
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|c| c.rule.id != rule_id);
        self.rules.len() != before
    }

    /// Toggle the only mutable field a rule has.
    pub fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> bool {
        for compiled in &mut self.rules {
            if compiled.rule.id == rule_id {
                compiled.rule.enabled = enabled;
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate `text` against every enabled rule whose age range contains
    /// `age` and whose language list contains `language` (or is empty).
    /// Emits one match per triggering keyword or pattern hit; overlapping
    /// keywords within one rule are not deduplicated.
    pub fn evaluate(&self, text: &str, age: u8, language: Language) -> Vec<RuleMatch> {
        let text_lower = text.to_lowercase();
        let mut matches = Vec::new();

        for compiled in &self.rules {
            let rule = &compiled.rule;
            if !rule.enabled {
                continue;
            }
            if age < rule.age_range.0 || age > rule.age_range.1 {
                continue;
            }
            if !rule.languages.is_empty() && !rule.languages.contains(&language) {
                continue;
            }

            if let Some(pattern) = &compiled.pattern {
                if let Some(found) = pattern.find(text) {
                    matches.push(RuleMatch {
                        rule_id: rule.id.clone(),
                        category: rule.category,
                        severity: rule.severity,
                        matched_text: found.as_str().to_string(),
                    });
                }
            }

            for keyword in &rule.keywords {
                if text_lower.contains(&keyword.to_lowercase()) {
                    matches.push(RuleMatch {
                        rule_id: rule.id.clone(),
                        category: rule.category,
                        severity: rule.severity,
                        matched_text: keyword.clone(),
                    });
                }
            }
        }

        matches
    }

    /// The rule behind a match, for action/override lookups.
    pub fn rule(&self, rule_id: &str) -> Option<&ModerationRule> {
        self.rules
            .iter()
            .find(|c| c.rule.id == rule_id)
            .map(|c| &c.rule)
    }
}

/// Built-in rules. Keyword lists are deliberately conservative; deployments
/// extend them via the YAML rule-set file.
pub fn default_rules() -> Vec<ModerationRule> {
    vec![
        ModerationRule {
            id: "personal_info_1".to_string(),
            name: "Personal information detection".to_string(),
            description: "Phone numbers and long digit runs".to_string(),
            keywords: vec![],
            pattern: Some(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b|\b\d{5,}\b".to_string()),
            is_regex: true,
            category: Category::PersonalInfo,
            severity: Severity::High,
            age_range: (0, 18),
            languages: vec![],
            enabled: true,
            parent_override: false,
            action: RuleAction::Block,
        },
        ModerationRule {
            id: "violence_1".to_string(),
            name: "Violence keywords".to_string(),
            description: "Violent language".to_string(),
            keywords: ["kill", "murder", "hurt", "attack", "weapon"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pattern: None,
            is_regex: false,
            category: Category::Violence,
            severity: Severity::High,
            age_range: (0, 18),
            languages: vec![],
            enabled: true,
            parent_override: false,
            action: RuleAction::Block,
        },
        ModerationRule {
            id: "scary_content_1".to_string(),
            name: "Scary content for young children".to_string(),
            description: "Content that might scare young children".to_string(),
            keywords: ["monster", "ghost", "nightmare", "demon"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pattern: None,
            is_regex: false,
            category: Category::ScaryContent,
            severity: Severity::Low,
            age_range: (3, 8),
            languages: vec![],
            enabled: true,
            parent_override: true,
            action: RuleAction::Log,
        },
        ModerationRule {
            id: "bullying_1".to_string(),
            name: "Bullying detection".to_string(),
            description: "Bullying language".to_string(),
            keywords: ["stupid", "dumb", "loser", "hate you", "nobody likes"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pattern: None,
            is_regex: false,
            category: Category::Bullying,
            severity: Severity::Medium,
            age_range: (0, 18),
            // Single medium blocks stay quiet; repeated ones escalate
            // through the violation tracker.
            languages: vec![],
            enabled: true,
            parent_override: true,
            action: RuleAction::Block,
        },
        ModerationRule {
            id: "self_harm_1".to_string(),
            name: "Self-harm signals".to_string(),
            description: "Self-harm language requiring immediate attention".to_string(),
            keywords: ["cut myself", "kill myself", "want to die"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            pattern: None,
            is_regex: false,
            category: Category::SelfHarm,
            severity: Severity::Critical,
            age_range: (0, 18),
            languages: vec![],
            enabled: true,
            parent_override: false,
            action: RuleAction::Block,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Safe < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn default_rules_compile() {
        let engine = RuleEngine::with_default_rules().unwrap();
        assert!(!engine.is_empty());
    }

    #[test]
    fn keyword_match_is_case_insensitive_substring() {
        let engine = RuleEngine::with_default_rules().unwrap();
        let matches = engine.evaluate("You are STUPID", 10, Language::English);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].rule_id, "bullying_1");
        assert_eq!(matches[0].matched_text, "stupid");
    }

    #[test]
    fn regex_rule_matches_phone_number() {
        let engine = RuleEngine::with_default_rules().unwrap();
        let matches = engine.evaluate("call me at 555-123-4567", 10, Language::English);
        assert!(matches.iter().any(|m| m.rule_id == "personal_info_1"));
    }

    #[test]
    fn age_range_filters_rules() {
        let engine = RuleEngine::with_default_rules().unwrap();
        // Scary-content rule applies to ages 3-8 only
        assert!(!engine
            .evaluate("a scary monster", 5, Language::English)
            .is_empty());
        assert!(engine
            .evaluate("a scary monster", 12, Language::English)
            .is_empty());
    }

    #[test]
    fn language_filter_respects_wildcard() {
        let mut rule = default_rules().remove(3);
        rule.languages = vec![Language::Arabic];
        let engine = RuleEngine::new(vec![rule]).unwrap();
        assert!(engine
            .evaluate("you are stupid", 10, Language::English)
            .is_empty());
        assert!(!engine
            .evaluate("you are stupid", 10, Language::Arabic)
            .is_empty());
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut engine = RuleEngine::with_default_rules().unwrap();
        assert!(engine.set_enabled("bullying_1", false));
        assert!(engine
            .evaluate("you are stupid", 10, Language::English)
            .is_empty());
    }

    #[test]
    fn overlapping_keywords_emit_multiple_matches() {
        let rule = ModerationRule {
            id: "multi".to_string(),
            name: "multi".to_string(),
            description: String::new(),
            keywords: vec!["stupid".to_string(), "loser".to_string()],
            pattern: None,
            is_regex: false,
            category: Category::Bullying,
            severity: Severity::Medium,
            age_range: (0, 18),
            languages: vec![],
            enabled: true,
            parent_override: false,
            action: RuleAction::Block,
        };
        let engine = RuleEngine::new(vec![rule]).unwrap();
        let matches = engine.evaluate("stupid loser", 10, Language::English);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn invalid_regex_is_rejected_with_rule_id() {
        let mut rule = default_rules().remove(0);
        rule.pattern = Some("(unclosed".to_string());
        let err = RuleEngine::new(vec![rule]).unwrap_err();
        assert!(err.to_string().contains("personal_info_1"));
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = serde_yaml::to_string(&default_rules()).unwrap();
        let engine = RuleEngine::from_yaml_str(&yaml).unwrap();
        assert_eq!(engine.len(), default_rules().len());
    }

    #[test]
    fn yaml_file_loads() {
        use std::io::Write;

        let yaml = serde_yaml::to_string(&default_rules()).unwrap();
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let engine = RuleEngine::from_yaml_file(file.path()).unwrap();
        assert_eq!(engine.len(), default_rules().len());
    }
}
