//! Coerces raw feed records into typed [`Reading`]s.
//!
//! Normalization never fails as a whole. Records with an unusable
//! timestamp are left out of the series, metric values that do not parse
//! become `None`, and both cases are reported back as [`ParseWarning`]s.
//!
//! Per field:
//! - `created_at`: RFC 3339 or `YYYY-MM-DD[T ]HH:MM:SS[.fff]±HHMM` (any
//!   offset, converted to UTC), an offset-less `YYYY-MM-DD[T ]HH:MM:SS[.fff]`
//!   read as UTC, or a bare `YYYY-MM-DD` taken as midnight UTC.
//! - `field1`..`field6`: JSON number or numeric string. Absent, `null` and
//!   blank values are `None` silently; anything else that is not a finite
//!   float is `None` with a warning.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::model::{Metric, Metrics, RawRecord, Reading, Series};

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A non-fatal problem found while normalizing one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParseWarning {
    /// The record was dropped from the series.
    UnparseableTimestamp { index: usize, raw: Option<String> },
    /// The metric was set to `None`; the record was kept.
    UnparseableMetric {
        index: usize,
        metric: Metric,
        raw: String,
    },
}

/// What happened to a batch during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseReport {
    pub total_records: usize,
    pub warnings: Vec<ParseWarning>,
}

impl ParseReport {
    /// True when any timestamp or metric could not be parsed.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn dropped_records(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, ParseWarning::UnparseableTimestamp { .. }))
            .count()
    }

    pub fn nulled_metrics(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, ParseWarning::UnparseableMetric { .. }))
            .count()
    }
}

/// Normalized series plus the report of what was dropped or nulled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub series: Series,
    pub report: ParseReport,
}

/// Maps a batch of raw records onto the canonical schema.
///
/// Output keeps feed order; it is deterministic and reads no clock.
pub fn normalize(records: &[RawRecord]) -> Normalized {
    let mut series = Vec::with_capacity(records.len());
    let mut warnings = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let Some(timestamp) = record.created_at().and_then(parse_timestamp) else {
            warnings.push(ParseWarning::UnparseableTimestamp {
                index,
                raw: record.created_at().map(value_text),
            });
            continue;
        };

        let mut metrics = Metrics::default();
        for metric in Metric::ALL {
            match coerce_metric(record.slot(metric.slot())) {
                Ok(value) => metrics.set(metric, value),
                Err(raw) => warnings.push(ParseWarning::UnparseableMetric { index, metric, raw }),
            }
        }

        series.push(Reading { timestamp, metrics });
    }

    let report = ParseReport {
        total_records: records.len(),
        warnings,
    };

    if report.has_warnings() {
        warn!(
            total = report.total_records,
            dropped = report.dropped_records(),
            nulled = report.nulled_metrics(),
            "Some feed values could not be parsed"
        );
    }

    Normalized { series, report }
}

/// Parses a feed timestamp into UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(text, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
    {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// `Ok(None)` for missing values, `Err(raw)` for values that are present but unusable.
fn coerce_metric(value: Option<&Value>) -> Result<Option<f64>, String> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(value.map(value_text).unwrap_or_default()),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
