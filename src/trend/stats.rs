use chrono::{DateTime, Utc};

use crate::models::TrendPoint;

/// Least-squares fit of `value` against seconds elapsed since the first point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl Regression {
    pub fn at(&self, elapsed_secs: f64) -> f64 {
        self.intercept + self.slope * elapsed_secs
    }
}

/// Trailing moving average; the window shrinks near the start of the series
/// so the first average equals the first value.
pub fn moving_average(points: &[TrendPoint], period: usize) -> Vec<TrendPoint> {
    let period = period.max(1);

    points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let window = &points[(i + 1).saturating_sub(period)..=i];
            let sum: f64 = window.iter().map(|p| p.value).sum();
            TrendPoint {
                timestamp: point.timestamp,
                value: sum / window.len() as f64,
            }
        })
        .collect()
}

pub fn elapsed_secs(origin: DateTime<Utc>, timestamp: DateTime<Utc>) -> f64 {
    (timestamp - origin).num_milliseconds() as f64 / 1000.0
}

/// Ordinary least squares over `(x, y)` pairs.
///
/// Slope and R² stay 0 with fewer than two points or when every x is equal.
/// R² stays 0 when y is constant.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Regression {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return Regression::default();
    }

    let n_f = n as f64;
    let mean_x = xs[..n].iter().sum::<f64>() / n_f;
    let mean_y = ys[..n].iter().sum::<f64>() / n_f;

    if n < 2 {
        return Regression {
            slope: 0.0,
            intercept: mean_y,
            r_squared: 0.0,
        };
    }

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }

    if sxx == 0.0 {
        return Regression {
            slope: 0.0,
            intercept: mean_y,
            r_squared: 0.0,
        };
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let predicted = intercept + slope * x;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }

    let r_squared = if ss_tot == 0.0 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Regression {
        slope,
        intercept,
        r_squared,
    }
}

/// (min, max, mean, population standard deviation). All zero when empty.
pub fn describe(values: &[f64]) -> (f64, f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }

    let n = values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    (min, max, mean, variance.sqrt())
}
