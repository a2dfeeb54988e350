use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub snapshot_count: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub dumps: u64,
    pub stacks: u64,
    pub warnings: u64,
    pub errors: u64,
    pub latest_ratio: f64,
    pub peak_ratio: f64,
    /// Snapshots the recorder missed because it fell behind the broadcast.
    pub dropped: u64,
}

impl Default for HistorySummary {
    fn default() -> Self {
        Self {
            snapshot_count: 0,
            first_timestamp: None,
            last_timestamp: None,
            dumps: 0,
            stacks: 0,
            warnings: 0,
            errors: 0,
            latest_ratio: 0.0,
            peak_ratio: 0.0,
            dropped: 0,
        }
    }
}
