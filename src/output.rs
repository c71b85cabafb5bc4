//! Output formatting and persistence for pipeline tables.
//!
//! Supports pretty-printing, JSON serialization, and CSV export.

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{debug, info};

use crate::model::Metrics;
use crate::pipeline::Table;

/// Flat CSV row shared by readings and buckets. `count` is empty for readings.
#[derive(Debug, Serialize)]
struct CsvRow {
    timestamp: DateTime<Utc>,
    count: Option<usize>,
    #[serde(rename = "PM2.5")]
    pm2_5: Option<f64>,
    #[serde(rename = "PM10")]
    pm10: Option<f64>,
    #[serde(rename = "Ozone")]
    ozone: Option<f64>,
    #[serde(rename = "Humidity")]
    humidity: Option<f64>,
    #[serde(rename = "Temperature")]
    temperature: Option<f64>,
    #[serde(rename = "CO")]
    carbon_monoxide: Option<f64>,
}

impl CsvRow {
    fn new(timestamp: DateTime<Utc>, count: Option<usize>, m: &Metrics) -> Self {
        Self {
            timestamp,
            count,
            pm2_5: m.pm2_5,
            pm10: m.pm10,
            ozone: m.ozone,
            humidity: m.humidity,
            temperature: m.temperature,
            carbon_monoxide: m.carbon_monoxide,
        }
    }
}

fn csv_rows(table: &Table) -> Vec<CsvRow> {
    match table {
        Table::Readings(rows) => rows
            .iter()
            .map(|r| CsvRow::new(r.timestamp, None, &r.metrics))
            .collect(),
        Table::Buckets(rows) => rows
            .iter()
            .map(|b| CsvRow::new(b.start, Some(b.count), &b.metrics))
            .collect(),
    }
}

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty<T: std::fmt::Debug>(value: &T) {
    info!("{:#?}", value);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes `table` to `path`, replacing any existing file.
pub fn write_csv(path: &str, table: &Table) -> Result<()> {
    debug!(path, rows = table.len(), "Writing CSV");
    let file = File::create(path)?;
    write_rows(file, table, true)
}

/// Appends the rows of `table` to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_csv(path: &str, table: &Table) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;
    write_rows(file, table, !file_exists)
}

fn write_rows(file: File, table: &Table, headers: bool) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(headers).from_writer(file);

    for row in csv_rows(table) {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}
