//! Moderation decision service
//!
//! Wraps the rule engine and heuristic analyzer, aggregates their findings
//! into a single `ModerationResult`, and notifies the parent-alert sink.
//! The service fails closed: any internal error degrades to the most
//! conservative outcome because this gates child-facing content.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use companion_config::ModerationSettings;
use companion_core::Language;

use crate::heuristics::HeuristicAnalyzer;
use crate::rules::{Category, RuleAction, RuleEngine, Severity};
use crate::tracker::ViolationTracker;
use crate::ModerationError;

/// Outcome of moderating one message. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationResult {
    pub is_safe: bool,
    pub severity: Severity,
    pub flagged_categories: BTreeSet<Category>,
    /// Per-category confidence: 1.0 when a high/critical rule matched the
    /// category, 0.5 otherwise (heuristic hits report their own score)
    pub confidence: BTreeMap<Category, f32>,
    pub matched_rules: Vec<String>,
    /// Set when a medium match warned rather than blocked
    pub warning: bool,
    pub alternative_response: Option<String>,
    pub should_alert_parent: bool,
}

impl ModerationResult {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            severity: Severity::Safe,
            flagged_categories: BTreeSet::new(),
            confidence: BTreeMap::new(),
            matched_rules: Vec::new(),
            warning: false,
            alternative_response: None,
            should_alert_parent: false,
        }
    }

    /// Most conservative outcome, used when evaluation itself fails.
    pub fn fail_closed(language: Language) -> Self {
        Self {
            is_safe: false,
            severity: Severity::High,
            flagged_categories: BTreeSet::new(),
            confidence: BTreeMap::new(),
            matched_rules: Vec::new(),
            warning: false,
            alternative_response: Some(generic_alternative(language).to_string()),
            should_alert_parent: true,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.is_safe
    }
}

/// Alert delivered to the parent-notification sink.
#[derive(Debug, Clone, Serialize)]
pub struct ParentAlert {
    pub child_id: Option<String>,
    /// First 100 characters of the offending message
    pub snippet: String,
    pub severity: Severity,
    pub categories: Vec<Category>,
    pub timestamp: DateTime<Utc>,
}

/// Downstream parent-notification sink. Receives every result with
/// `should_alert_parent` set; delivery is fire-and-forget and must never
/// block the pipeline.
#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn send(&self, alert: ParentAlert);
}

/// Aggregates rule-engine and heuristic findings into moderation decisions.
pub struct ModerationService {
    engine: RwLock<RuleEngine>,
    heuristics: HeuristicAnalyzer,
    tracker: ViolationTracker,
    alert_sink: Option<Arc<dyn AlertSink>>,
}

impl ModerationService {
    pub fn new(engine: RuleEngine, settings: &ModerationSettings) -> Self {
        Self {
            engine: RwLock::new(engine),
            heuristics: HeuristicAnalyzer::new(settings.heuristic_threshold),
            tracker: ViolationTracker::new(
                Duration::from_secs(settings.alert_window_secs),
                settings.alert_thresholds.clone(),
            ),
            alert_sink: None,
        }
    }

    /// Build from settings: rules come from the configured YAML file, or
    /// the built-in defaults when none is set.
    pub fn from_settings(settings: &ModerationSettings) -> Result<Self, ModerationError> {
        let engine = match &settings.rules_path {
            Some(path) => RuleEngine::from_yaml_file(std::path::Path::new(path))?,
            None => RuleEngine::with_default_rules()?,
        };
        Ok(Self::new(engine, settings))
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// Swap in a new rule set (admin hot-reload).
    pub fn replace_rules(&self, engine: RuleEngine) {
        *self.engine.write() = engine;
        tracing::info!("moderation rule set replaced");
    }

    /// Toggle a single rule (the only mutation rules permit).
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        self.engine.write().set_enabled(rule_id, enabled)
    }

    /// Moderate one message. Never returns an error: internal failures
    /// degrade to `ModerationResult::fail_closed`.
    pub async fn moderate(&self, text: &str, age: u8, language: Language) -> ModerationResult {
        self.moderate_inner(text, age, language, None).await
    }

    async fn moderate_inner(
        &self,
        text: &str,
        age: u8,
        language: Language,
        child_id: Option<&str>,
    ) -> ModerationResult {
        let result = match self.evaluate(text, age, language) {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(error = %err, "moderation evaluation failed, failing closed");
                ModerationResult::fail_closed(language)
            }
        };

        if result.should_alert_parent {
            self.dispatch_alert(child_id.map(str::to_string), text, &result);
        }
        result
    }

    /// Moderate with per-child violation tracking: repeated low-grade
    /// violations inside the sliding window escalate to a parent alert.
    /// Alerts raised here always carry the child id.
    pub async fn moderate_for_child(
        &self,
        text: &str,
        age: u8,
        language: Language,
        child_id: &str,
    ) -> ModerationResult {
        let mut result = self.moderate_inner(text, age, language, Some(child_id)).await;
        if result.severity > Severity::Safe {
            let escalate = self.tracker.record(child_id, result.severity);
            if escalate && !result.should_alert_parent {
                tracing::warn!(child_id, "violation threshold reached, alerting parent");
                result.should_alert_parent = true;
                self.dispatch_alert(Some(child_id.to_string()), text, &result);
            }
        }
        result
    }

    /// End-of-session cleanup for the violation tracker.
    pub fn end_session(&self, child_id: &str) {
        self.tracker.clear(child_id);
    }

    fn evaluate(
        &self,
        text: &str,
        age: u8,
        language: Language,
    ) -> Result<ModerationResult, ModerationError> {
        struct Hit {
            rule_id: Option<String>,
            category: Category,
            severity: Severity,
            action: RuleAction,
            parent_override: bool,
            score: Option<f32>,
        }

        let engine = self.engine.read();
        let matches = engine.evaluate(text, age, language);

        let mut hits: Vec<Hit> = matches
            .iter()
            .map(|m| {
                let rule = engine.rule(&m.rule_id);
                Hit {
                    rule_id: Some(m.rule_id.clone()),
                    category: m.category,
                    severity: m.severity,
                    action: rule.map(|r| r.action).unwrap_or_default(),
                    parent_override: rule.map(|r| r.parent_override).unwrap_or(false),
                    score: None,
                }
            })
            .collect();
        drop(engine);

        // Secondary heuristic checks only when no discrete rule matched.
        if hits.is_empty() {
            for signal in self.heuristics.assess(text) {
                hits.push(Hit {
                    rule_id: None,
                    category: signal.category,
                    severity: signal.severity,
                    action: if signal.severity >= Severity::High {
                        RuleAction::Block
                    } else {
                        RuleAction::Warn
                    },
                    parent_override: false,
                    score: Some(signal.score),
                });
            }
        }

        if hits.is_empty() {
            return Ok(ModerationResult::safe());
        }

        let severity = hits.iter().map(|h| h.severity).max().unwrap_or_default();
        let mut flagged_categories = BTreeSet::new();
        let mut confidence: BTreeMap<Category, f32> = BTreeMap::new();
        let mut matched_rules = Vec::new();
        for hit in &hits {
            flagged_categories.insert(hit.category);
            let score = hit
                .score
                .unwrap_or(if hit.severity >= Severity::High { 1.0 } else { 0.5 });
            let entry = confidence.entry(hit.category).or_insert(0.0);
            *entry = entry.max(score);
            if let Some(id) = &hit.rule_id {
                if !matched_rules.contains(id) {
                    matched_rules.push(id.clone());
                }
            }
        }

        let blocked = severity >= Severity::High
            || (severity == Severity::Medium
                && hits
                    .iter()
                    .any(|h| h.severity == Severity::Medium && h.action == RuleAction::Block));
        let warning = !blocked && severity == Severity::Medium;

        // Category of the highest-severity hit drives the template choice.
        let top_category = hits
            .iter()
            .max_by_key(|h| h.severity)
            .map(|h| h.category)
            .unwrap_or(Category::AgeInappropriate);

        let should_alert_parent = severity >= Severity::High
            || hits
                .iter()
                .any(|h| !h.parent_override && h.action == RuleAction::Block && blocked);

        if blocked {
            tracing::warn!(
                severity = ?severity,
                categories = ?flagged_categories,
                rules = ?matched_rules,
                "content blocked"
            );
        } else if severity > Severity::Safe {
            tracing::info!(severity = ?severity, categories = ?flagged_categories, "content flagged");
        }

        Ok(ModerationResult {
            is_safe: !blocked,
            severity,
            flagged_categories,
            confidence,
            matched_rules,
            warning,
            alternative_response: blocked.then(|| alternative_response(top_category, language)),
            should_alert_parent,
        })
    }

    fn dispatch_alert(&self, child_id: Option<String>, text: &str, result: &ModerationResult) {
        let Some(sink) = &self.alert_sink else {
            return;
        };
        let alert = ParentAlert {
            child_id,
            snippet: text.chars().take(100).collect(),
            severity: result.severity,
            categories: result.flagged_categories.iter().copied().collect(),
            timestamp: Utc::now(),
        };
        let sink = Arc::clone(sink);
        // Fire and forget; alert delivery must never block moderation.
        tokio::spawn(async move {
            sink.send(alert).await;
        });
    }
}

/// Per-category safe alternative, in the child's language.
fn alternative_response(category: Category, language: Language) -> String {
    let line = match (category, language) {
        (Category::Violence, Language::Arabic) => "دعنا نتحدث عن شيء لطيف ومرح بدلاً من ذلك!",
        (Category::Violence, _) => "Let's talk about something kind and fun instead!",
        (Category::PersonalInfo, Language::Arabic) => {
            "من المهم أن نحافظ على معلوماتنا الشخصية آمنة. لا تشارك معلومات خاصة مع أي شخص."
        }
        (Category::PersonalInfo, _) => {
            "It's important to keep our personal information safe. Let's not share private things."
        }
        (Category::Bullying, Language::Arabic) => {
            "لنكن لطفاء مع بعضنا البعض. الكلمات اللطيفة تجعل الجميع سعداء!"
        }
        (Category::Bullying, _) => "Let's be kind to each other. Gentle words make everyone happy!",
        (Category::ScaryContent, Language::Arabic) => {
            "هل تريد أن نتحدث عن شيء مرح وسعيد بدلاً من ذلك؟"
        }
        (Category::ScaryContent, _) => "How about we talk about something happy instead?",
        (Category::SelfHarm, _) => {
            "I care about you. Let's talk to a grown-up you trust about how you're feeling."
        }
        _ => generic_alternative(language),
    };
    line.to_string()
}

fn generic_alternative(language: Language) -> &'static str {
    match language {
        Language::Arabic => "دعنا نغير الموضوع إلى شيء أكثر إيجابية!",
        _ => "Let's change the subject to something more positive!",
    }
}
