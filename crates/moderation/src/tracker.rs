//! Per-child violation tracking
//!
//! Sliding-window counts per severity, so repeated low-grade violations can
//! escalate to a parent alert even when no single message crosses the
//! blocking threshold.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use companion_config::AlertThresholds;

use crate::rules::Severity;

/// Tracks recent violations per child within a sliding window.
pub struct ViolationTracker {
    window: Duration,
    thresholds: AlertThresholds,
    entries: Mutex<HashMap<String, Vec<(Instant, Severity)>>>,
}

impl ViolationTracker {
    pub fn new(window: Duration, thresholds: AlertThresholds) -> Self {
        Self {
            window,
            thresholds,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a violation and report whether the accumulated counts within
    /// the window now warrant a parent alert.
    pub fn record(&self, child_id: &str, severity: Severity) -> bool {
        if severity == Severity::Safe {
            return false;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let history = entries.entry(child_id.to_string()).or_default();
        history.push((now, severity));
        history.retain(|(at, _)| now.duration_since(*at) <= self.window);

        let mut counts = [0u32; 4];
        for (_, sev) in history.iter() {
            match sev {
                Severity::Low => counts[0] += 1,
                Severity::Medium => counts[1] += 1,
                Severity::High => counts[2] += 1,
                Severity::Critical => counts[3] += 1,
                Severity::Safe => {}
            }
        }

        counts[0] >= self.thresholds.low
            || counts[1] >= self.thresholds.medium
            || counts[2] >= self.thresholds.high
            || counts[3] >= self.thresholds.critical
    }

    /// Drop all tracked history for a child (e.g. session end).
    pub fn clear(&self, child_id: &str) {
        self.entries.lock().remove(child_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ViolationTracker {
        ViolationTracker::new(Duration::from_secs(3600), AlertThresholds::default())
    }

    #[test]
    fn single_high_violation_alerts() {
        let t = tracker();
        assert!(t.record("child-1", Severity::High));
    }

    #[test]
    fn medium_violations_alert_after_threshold() {
        let t = tracker();
        assert!(!t.record("child-1", Severity::Medium));
        assert!(!t.record("child-1", Severity::Medium));
        assert!(t.record("child-1", Severity::Medium));
    }

    #[test]
    fn counts_are_per_child() {
        let t = tracker();
        t.record("child-1", Severity::Medium);
        t.record("child-1", Severity::Medium);
        assert!(!t.record("child-2", Severity::Medium));
    }

    #[test]
    fn clear_resets_history() {
        let t = tracker();
        t.record("child-1", Severity::Medium);
        t.record("child-1", Severity::Medium);
        t.clear("child-1");
        assert!(!t.record("child-1", Severity::Medium));
    }
}
