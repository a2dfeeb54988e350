use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HealthLevel {
    Normal,
    Warning,
    Critical,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Normal => "normal",
            HealthLevel::Warning => "warning",
            HealthLevel::Critical => "critical",
        }
    }
}

/// Counter snapshot published by the monitor.
///
/// `ratio` is always derived from `dumps`/`stacks` by the constructors. Two
/// snapshots describe the same state when [`Statistics::same_counts`] holds;
/// timestamp and ratio are not part of that comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub timestamp: DateTime<Utc>,
    pub dumps: u64,
    pub stacks: u64,
    pub warnings: u64,
    pub errors: u64,
    pub ratio: f64,
}

impl Statistics {
    pub fn new(timestamp: DateTime<Utc>, dumps: u64, stacks: u64, warnings: u64, errors: u64) -> Self {
        Self {
            timestamp,
            dumps,
            stacks,
            warnings,
            errors,
            ratio: compute_ratio(dumps, stacks),
        }
    }

    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, 0, 0, 0, 0)
    }

    /// Equality over the four counters only.
    pub fn same_counts(&self, other: &Statistics) -> bool {
        self.dumps == other.dumps
            && self.stacks == other.stacks
            && self.warnings == other.warnings
            && self.errors == other.errors
    }

    /// Adds `delta` on top of `self`, stamping the result with `timestamp`.
    pub fn merged_with(&self, delta: &Statistics, timestamp: DateTime<Utc>) -> Statistics {
        Statistics::new(
            timestamp,
            self.dumps.saturating_add(delta.dumps),
            self.stacks.saturating_add(delta.stacks),
            self.warnings.saturating_add(delta.warnings),
            self.errors.saturating_add(delta.errors),
        )
    }

    pub fn health(&self, warning_threshold: f64, error_threshold: f64) -> HealthLevel {
        if self.ratio >= error_threshold {
            HealthLevel::Critical
        } else if self.ratio >= warning_threshold {
            HealthLevel::Warning
        } else {
            HealthLevel::Normal
        }
    }
}

pub fn compute_ratio(dumps: u64, stacks: u64) -> f64 {
    if stacks == 0 {
        0.0
    } else {
        dumps as f64 / stacks as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_zero_without_stacks() {
        let stats = Statistics::new(Utc::now(), 7, 0, 0, 0);
        assert_eq!(stats.ratio, 0.0);
    }

    #[test]
    fn ratio_follows_counts() {
        let stats = Statistics::new(Utc::now(), 3, 4, 0, 0);
        assert_eq!(stats.ratio, 3.0 / 4.0);
    }

    #[test]
    fn same_counts_ignores_timestamp() {
        let a = Statistics::new(Utc::now(), 1, 2, 3, 4);
        let b = Statistics::new(a.timestamp + chrono::Duration::seconds(30), 1, 2, 3, 4);
        assert!(a.same_counts(&b));

        let c = Statistics::new(a.timestamp, 1, 2, 3, 5);
        assert!(!a.same_counts(&c));
    }

    #[test]
    fn merge_recomputes_ratio() {
        let base = Statistics::new(Utc::now(), 1, 1, 0, 0);
        let delta = Statistics::new(Utc::now(), 1, 3, 2, 1);
        let now = Utc::now();
        let merged = base.merged_with(&delta, now);

        assert_eq!(merged.dumps, 2);
        assert_eq!(merged.stacks, 4);
        assert_eq!(merged.warnings, 2);
        assert_eq!(merged.errors, 1);
        assert_eq!(merged.ratio, 0.5);
        assert_eq!(merged.timestamp, now);
    }

    #[test]
    fn health_uses_thresholds() {
        let now = Utc::now();
        assert_eq!(Statistics::new(now, 1, 10, 0, 0).health(0.5, 1.0), HealthLevel::Normal);
        assert_eq!(Statistics::new(now, 5, 10, 0, 0).health(0.5, 1.0), HealthLevel::Warning);
        assert_eq!(Statistics::new(now, 10, 10, 0, 0).health(0.5, 1.0), HealthLevel::Critical);
    }
}
