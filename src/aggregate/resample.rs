use crate::aggregate::utility::mean;
use crate::model::{Bucket, Metric, Metrics, Reading};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// A positive bucket width in whole seconds.
///
/// Buckets are aligned to the Unix epoch, so a 1-hour interval always
/// starts on the hour (UTC) and a 2-hour interval on even hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval(i64);

impl Interval {
    /// Returns `None` unless `secs` is strictly positive.
    pub fn from_secs(secs: i64) -> Option<Self> {
        (secs > 0).then_some(Self(secs))
    }

    pub fn hours(hours: i64) -> Option<Self> {
        Self::from_secs(hours.checked_mul(3600)?)
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }

    pub fn as_delta(self) -> TimeDelta {
        TimeDelta::seconds(self.0)
    }

    /// Epoch second at which the bucket holding `ts` starts.
    fn bucket_key(self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(self.0) * self.0
    }
}

#[derive(Default)]
struct BucketAcc {
    count: usize,
    earliest: Option<DateTime<Utc>>,
    values: HashMap<Metric, Vec<f64>>,
}

/// Resamples `series` onto `interval`-wide buckets using the mean.
///
/// Every metric is averaged over the non-null values that fell into the
/// bucket; a metric with no contributors stays `None`. Buckets that no
/// reading falls into are omitted. Output is ordered by bucket start and
/// is empty for an empty series.
pub fn resample(series: &[Reading], interval: Interval) -> Vec<Bucket> {
    let mut sorted: Vec<&Reading> = series.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    let mut buckets: BTreeMap<i64, BucketAcc> = BTreeMap::new();

    for reading in sorted {
        let acc = buckets.entry(interval.bucket_key(reading.timestamp)).or_default();
        acc.count += 1;
        acc.earliest.get_or_insert(reading.timestamp);

        for metric in Metric::ALL {
            if let Some(value) = reading.metrics.get(metric) {
                acc.values.entry(metric).or_default().push(value);
            }
        }
    }

    buckets
        .into_iter()
        .filter_map(|(key, acc)| {
            // aligned start can fall outside chrono's range for huge intervals
            let start = match DateTime::from_timestamp(key, 0) {
                Some(start) => start,
                None => {
                    let earliest = acc.earliest?;
                    warn!(key, %earliest, "Bucket start out of range, using earliest reading");
                    earliest
                }
            };

            let mut metrics = Metrics::default();
            for (metric, values) in &acc.values {
                metrics.set(*metric, mean(values));
            }

            Some(Bucket {
                start,
                count: acc.count,
                metrics,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    fn reading(ts: DateTime<Utc>, pm2_5: Option<f64>) -> Reading {
        Reading {
            timestamp: ts,
            metrics: Metrics {
                pm2_5,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_interval_rejects_non_positive() {
        assert!(Interval::from_secs(0).is_none());
        assert!(Interval::from_secs(-60).is_none());
        assert_eq!(Interval::hours(2).map(|i| i.as_secs()), Some(7200));
    }

    #[test]
    fn test_resample_empty_series() {
        let interval = Interval::hours(1).unwrap();
        assert!(resample(&[], interval).is_empty());
    }

    #[test]
    fn test_mean_ignores_null_values() {
        let series = vec![reading(at(8, 10), Some(10.0)), reading(at(8, 50), None)];

        let buckets = resample(&series, Interval::hours(1).unwrap());

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].start, at(8, 0));
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].metrics.pm2_5, Some(10.0));
    }

    #[test]
    fn test_metric_without_values_is_none() {
        let series = vec![reading(at(8, 10), None), reading(at(8, 20), None)];

        let buckets = resample(&series, Interval::hours(1).unwrap());

        assert_eq!(buckets[0].metrics.pm2_5, None);
        assert_eq!(buckets[0].metrics.ozone, None);
    }

    #[test]
    fn test_unsorted_input_produces_ordered_buckets() {
        let series = vec![
            reading(at(11, 5), Some(5.0)),
            reading(at(8, 15), Some(1.0)),
            reading(at(8, 45), Some(3.0)),
        ];

        let buckets = resample(&series, Interval::hours(1).unwrap());

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].start, at(8, 0));
        assert_eq!(buckets[0].metrics.pm2_5, Some(2.0));
        // empty 9:00 and 10:00 buckets are omitted
        assert_eq!(buckets[1].start, at(11, 0));
        assert_eq!(buckets[1].metrics.pm2_5, Some(5.0));
    }

    #[test]
    fn test_two_hour_buckets_align_to_even_hours() {
        let series = vec![reading(at(9, 30), Some(4.0)), reading(at(10, 30), Some(8.0))];

        let buckets = resample(&series, Interval::hours(2).unwrap());

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].start, at(8, 0));
        assert_eq!(buckets[1].start, at(10, 0));
    }

    #[test]
    fn test_bucket_end_is_exclusive() {
        let series = vec![reading(at(8, 0), Some(1.0)), reading(at(9, 0), Some(9.0))];

        let buckets = resample(&series, Interval::hours(1).unwrap());

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].metrics.pm2_5, Some(1.0));
        assert_eq!(buckets[1].metrics.pm2_5, Some(9.0));
    }

    #[test]
    fn test_out_of_range_bucket_start_keeps_readings() {
        let earliest = DateTime::<Utc>::MIN_UTC;
        let series = vec![reading(earliest, Some(6.0))];

        let buckets = resample(&series, Interval::from_secs(1_000_000_000_000_000).unwrap());

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].start, earliest);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[0].metrics.pm2_5, Some(6.0));
    }
}
