use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::utility::{mean, stddev};
use crate::model::{Metric, Reading};

/// Descriptive statistics for one metric over a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub metric: Metric,
    /// Readings with a value for this metric.
    pub count: usize,
    /// Readings where it was null.
    pub missing: usize,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Value at the most recent reading that has one.
    pub latest: Option<f64>,
    pub latest_at: Option<DateTime<Utc>>,
}

impl MetricSummary {
    pub fn from_series(metric: Metric, series: &[Reading]) -> Self {
        let mut values = Vec::with_capacity(series.len());
        let mut latest: Option<(DateTime<Utc>, f64)> = None;

        for reading in series {
            let Some(value) = reading.metrics.get(metric) else {
                continue;
            };
            values.push(value);
            if latest.is_none_or(|(ts, _)| reading.timestamp >= ts) {
                latest = Some((reading.timestamp, value));
            }
        }

        let avg = mean(&values);

        MetricSummary {
            metric,
            count: values.len(),
            missing: series.len() - values.len(),
            mean: avg,
            stddev: avg.and_then(|m| stddev(&values, m)),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            latest: latest.map(|(_, v)| v),
            latest_at: latest.map(|(ts, _)| ts),
        }
    }
}

/// One [`MetricSummary`] per metric, in feed slot order.
pub fn summarize(series: &[Reading]) -> Vec<MetricSummary> {
    Metric::ALL
        .iter()
        .map(|&metric| MetricSummary::from_series(metric, series))
        .collect()
}

/// The `n` most recent readings, newest first.
pub fn latest(series: &[Reading], n: usize) -> Vec<Reading> {
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted.truncate(n);
    sorted
}
