use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSummary {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub standard_deviation: f64,
    pub slope: f64,
    pub r_squared: f64,
}

/// Per-metric analysis: raw series, trailing moving average and the fitted regression line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendData {
    pub points: Vec<TrendPoint>,
    pub moving_average: Vec<TrendPoint>,
    pub trend_line: Vec<TrendPoint>,
    pub summary: TrendSummary,
}

impl TrendData {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysisResult {
    pub dumps: TrendData,
    pub stacks: TrendData,
    pub warnings: TrendData,
    pub errors: TrendData,
    pub ratio: TrendData,
    pub time_range: Option<TimeRange>,
}

impl TrendAnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.time_range.is_none()
    }
}
