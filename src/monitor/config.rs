use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::tail::{EncodingOptions, TextEncoding};

/// Monitoring configuration. Treated as an immutable value: the monitor swaps
/// the whole thing, never individual fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub log_file_path: PathBuf,
    pub poll_interval_ms: u64,
    pub max_retained_entries: usize,
    pub use_change_notifier: bool,
    pub warning_ratio_threshold: f64,
    pub error_ratio_threshold: f64,
    pub auto_detect_encoding: bool,
    pub fallback_encoding: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_file_path: PathBuf::new(),
            poll_interval_ms: 1000,
            max_retained_entries: 10_000,
            use_change_notifier: true,
            warning_ratio_threshold: 0.5,
            error_ratio_threshold: 1.0,
            auto_detect_encoding: true,
            fallback_encoding: "utf-8".into(),
        }
    }
}

impl MonitorConfig {
    pub fn with_log_file(path: impl Into<PathBuf>) -> Self {
        Self {
            log_file_path: path.into(),
            ..Self::default()
        }
    }

    /// Every rule violation, in a fixed order. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.poll_interval_ms == 0 {
            violations.push("poll interval must be greater than zero".to_string());
        }
        if self.max_retained_entries == 0 {
            violations.push("max retained entries must be greater than zero".to_string());
        }
        // `!(x >= 0.0)` also rejects NaN.
        if !(self.warning_ratio_threshold >= 0.0) {
            violations.push(format!(
                "warning ratio threshold must be >= 0 (got {})",
                self.warning_ratio_threshold
            ));
        }
        if !(self.error_ratio_threshold >= 0.0) {
            violations.push(format!(
                "error ratio threshold must be >= 0 (got {})",
                self.error_ratio_threshold
            ));
        }
        if !(self.error_ratio_threshold > self.warning_ratio_threshold) {
            violations.push(format!(
                "error ratio threshold ({}) must be greater than warning ratio threshold ({})",
                self.error_ratio_threshold, self.warning_ratio_threshold
            ));
        }
        if self.fallback_encoding.trim().is_empty() {
            violations.push("fallback encoding must not be empty".to_string());
        }

        violations
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn encoding_options(&self) -> EncodingOptions {
        let fallback = TextEncoding::from_label(&self.fallback_encoding).unwrap_or_else(|| {
            warn!(
                "Unrecognised fallback encoding '{}'; using utf-8",
                self.fallback_encoding
            );
            TextEncoding::Utf8
        });

        EncodingOptions {
            auto_detect: self.auto_detect_encoding,
            fallback,
        }
    }
}
