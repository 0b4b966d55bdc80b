//! Trend analysis over a monitor's history
//!
//! Growth rate is the least-squares slope of the samples in the window,
//! expressed per minute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Direction of a trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Statistics over the samples inside a trend window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub direction: TrendDirection,
    /// Change per minute (MB/minute for memory, percent/minute for CPU)
    pub growth_rate_per_minute: f64,
    pub peak: f64,
    pub average: f64,
    pub current: f64,
    /// Fraction of consecutive sample pairs that did not decrease
    pub monotonicity: f64,
    pub samples: usize,
    pub window_secs: u64,
}

/// Result of a trend query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Trend {
    /// Fewer than two samples fell inside the window
    InsufficientData { samples: usize },
    Analysis(TrendSummary),
}

impl Trend {
    pub fn summary(&self) -> Option<&TrendSummary> {
        match self {
            Trend::Analysis(summary) => Some(summary),
            Trend::InsufficientData { .. } => None,
        }
    }
}

/// Summarize the points whose timestamps fall within `window` of the newest point
///
/// `stable_band` is the absolute per-minute rate below which the trend is
/// reported as stable. Points must be ordered oldest first.
pub(crate) fn summarize(
    points: &[(DateTime<Utc>, f64)],
    window: Duration,
    stable_band: f64,
) -> Trend {
    let Some((latest, _)) = points.last() else {
        return Trend::InsufficientData { samples: 0 };
    };

    // A window reaching past the representable range covers every point
    let window_start = chrono::Duration::from_std(window)
        .ok()
        .and_then(|span| latest.checked_sub_signed(span));
    let in_window: Vec<(DateTime<Utc>, f64)> = points
        .iter()
        .filter(|(ts, _)| window_start.map_or(true, |start| *ts >= start))
        .copied()
        .collect();

    if in_window.len() < 2 {
        return Trend::InsufficientData {
            samples: in_window.len(),
        };
    }

    let t0 = in_window[0].0;
    let series: Vec<(f64, f64)> = in_window
        .iter()
        .map(|(ts, value)| {
            let minutes = (*ts - t0).num_milliseconds() as f64 / 60_000.0;
            (minutes, *value)
        })
        .collect();
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();

    let growth_rate = linear_regression_slope(&series);
    let direction = if growth_rate > stable_band {
        TrendDirection::Increasing
    } else if growth_rate < -stable_band {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    let peak = values.iter().copied().fold(f64::MIN, f64::max);
    let average = values.iter().sum::<f64>() / values.len() as f64;

    Trend::Analysis(TrendSummary {
        direction,
        growth_rate_per_minute: growth_rate,
        peak,
        average,
        current: values[values.len() - 1],
        monotonicity: monotonicity(&values),
        samples: values.len(),
        window_secs: window.as_secs(),
    })
}

/// Least-squares slope of `(x, y)` points
pub(crate) fn linear_regression_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for (x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Fraction of consecutive pairs where the value did not decrease
pub(crate) fn monotonicity(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let non_decreasing = values.windows(2).filter(|w| w[1] >= w[0]).count();
    non_decreasing as f64 / (values.len() - 1) as f64
}
