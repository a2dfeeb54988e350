use rayon::prelude::*;

use crate::models::{Statistics, TimeRange, TrendAnalysisResult, TrendData, TrendPoint, TrendSummary};

use super::stats::{describe, elapsed_secs, linear_regression, moving_average};

pub const DEFAULT_MOVING_AVERAGE_PERIOD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    Dumps,
    Stacks,
    Warnings,
    Errors,
    Ratio,
}

impl Metric {
    const ALL: [Metric; 5] = [
        Metric::Dumps,
        Metric::Stacks,
        Metric::Warnings,
        Metric::Errors,
        Metric::Ratio,
    ];

    fn value(&self, stats: &Statistics) -> f64 {
        match self {
            Metric::Dumps => stats.dumps as f64,
            Metric::Stacks => stats.stacks as f64,
            Metric::Warnings => stats.warnings as f64,
            Metric::Errors => stats.errors as f64,
            Metric::Ratio => stats.ratio,
        }
    }
}

/// Analyze a chronological series of snapshots.
///
/// The five metrics are computed independently on the rayon pool. An empty
/// series gives an empty result.
pub fn analyze(series: &[Statistics], moving_average_period: usize) -> TrendAnalysisResult {
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return TrendAnalysisResult::default();
    };

    let mut per_metric: Vec<(Metric, TrendData)> = Metric::ALL
        .par_iter()
        .map(|metric| {
            let points: Vec<TrendPoint> = series
                .iter()
                .map(|stats| TrendPoint {
                    timestamp: stats.timestamp,
                    value: metric.value(stats),
                })
                .collect();
            (*metric, calculate_trend(&points, moving_average_period))
        })
        .collect();

    let mut take = |wanted: Metric| {
        per_metric
            .iter()
            .position(|(metric, _)| *metric == wanted)
            .map(|index| per_metric.swap_remove(index).1)
            .unwrap_or_default()
    };

    TrendAnalysisResult {
        dumps: take(Metric::Dumps),
        stacks: take(Metric::Stacks),
        warnings: take(Metric::Warnings),
        errors: take(Metric::Errors),
        ratio: take(Metric::Ratio),
        time_range: Some(TimeRange {
            start: first.timestamp,
            end: last.timestamp,
        }),
    }
}

/// Moving average, regression line and summary for one metric.
pub fn calculate_trend(points: &[TrendPoint], period: usize) -> TrendData {
    let Some(origin) = points.first().map(|p| p.timestamp) else {
        return TrendData::default();
    };

    let xs: Vec<f64> = points
        .iter()
        .map(|p| elapsed_secs(origin, p.timestamp))
        .collect();
    let ys: Vec<f64> = points.iter().map(|p| p.value).collect();

    let fit = linear_regression(&xs, &ys);
    let trend_line = points
        .iter()
        .zip(&xs)
        .map(|(p, x)| TrendPoint {
            timestamp: p.timestamp,
            value: fit.at(*x),
        })
        .collect();

    let (min, max, average, standard_deviation) = describe(&ys);

    TrendData {
        points: points.to_vec(),
        moving_average: moving_average(points, period),
        trend_line,
        summary: TrendSummary {
            min,
            max,
            average,
            standard_deviation,
            slope: fit.slope,
            r_squared: fit.r_squared,
        },
    }
}
