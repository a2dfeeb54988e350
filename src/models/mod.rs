pub mod log_entry;
pub mod statistics;
pub mod trend;

pub use log_entry::{EntryType, LogEntry};
pub use statistics::{compute_ratio, HealthLevel, Statistics};
pub use trend::{TimeRange, TrendAnalysisResult, TrendData, TrendPoint, TrendSummary};
