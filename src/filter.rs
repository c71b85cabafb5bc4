//! Time-bounded views over readings or buckets.
//!
//! All calendar arithmetic is done in UTC, the same reference the
//! normalizer resolves timestamps into.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::Timestamped;

/// A predicate selecting part of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FilterSpec {
    All,
    Year(i32),
    YearMonth { year: i32, month: u32 },
    Date(NaiveDate),
    /// Half-open: `start <= t < end`.
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl FilterSpec {
    pub fn matches(&self, ts: DateTime<Utc>) -> bool {
        match self {
            FilterSpec::All => true,
            FilterSpec::Year(year) => ts.year() == *year,
            FilterSpec::YearMonth { year, month } => ts.year() == *year && ts.month() == *month,
            FilterSpec::Date(date) => ts.date_naive() == *date,
            FilterSpec::Range { start, end } => *start <= ts && ts < *end,
        }
    }
}

/// Returns the elements matching `spec`, ordered by timestamp.
///
/// The input is left untouched; an empty result means "no data for this
/// selection" and is not an error.
pub fn select<T: Timestamped + Clone>(items: &[T], spec: &FilterSpec) -> Vec<T> {
    let mut out: Vec<T> = items
        .iter()
        .filter(|item| spec.matches(item.timestamp()))
        .cloned()
        .collect();
    out.sort_by_key(|item| item.timestamp());
    out
}

/// Calendar choices actually present in the data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub years: Vec<i32>,
    pub months: BTreeMap<i32, Vec<u32>>,
    pub dates: Vec<NaiveDate>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Enumerates the years, months per year, and dates observed in `items`.
pub fn available_options<T: Timestamped>(items: &[T]) -> FilterOptions {
    let mut years = BTreeSet::new();
    let mut months: BTreeMap<i32, BTreeSet<u32>> = BTreeMap::new();
    let mut dates = BTreeSet::new();
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;

    for item in items {
        let ts = item.timestamp();
        years.insert(ts.year());
        months.entry(ts.year()).or_default().insert(ts.month());
        dates.insert(ts.date_naive());
        earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
        latest = Some(latest.map_or(ts, |l| l.max(ts)));
    }

    FilterOptions {
        years: years.into_iter().collect(),
        months: months
            .into_iter()
            .map(|(year, set)| (year, set.into_iter().collect()))
            .collect(),
        dates: dates.into_iter().collect(),
        earliest,
        latest,
    }
}
