//! Data types shared by the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One feed entry exactly as received, before any coercion.
///
/// The feed publishes a `created_at` string plus generic `field1`..`field8`
/// slots whose values may be JSON strings, numbers, or null.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn created_at(&self) -> Option<&Value> {
        self.0.get("created_at")
    }

    /// Value of generic slot `fieldN` (1-based).
    pub fn slot(&self, slot: u8) -> Option<&Value> {
        self.0.get(&format!("field{slot}"))
    }
}

/// The six measured quantities, in feed slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Pm2_5,
    Pm10,
    Ozone,
    Humidity,
    Temperature,
    CarbonMonoxide,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Pm2_5,
        Metric::Pm10,
        Metric::Ozone,
        Metric::Humidity,
        Metric::Temperature,
        Metric::CarbonMonoxide,
    ];

    /// 1-based feed slot this metric is published in.
    pub fn slot(self) -> u8 {
        match self {
            Metric::Pm2_5 => 1,
            Metric::Pm10 => 2,
            Metric::Ozone => 3,
            Metric::Humidity => 4,
            Metric::Temperature => 5,
            Metric::CarbonMonoxide => 6,
        }
    }

    /// Column heading used by renderers.
    pub fn label(self) -> &'static str {
        match self {
            Metric::Pm2_5 => "PM2.5",
            Metric::Pm10 => "PM10",
            Metric::Ozone => "Ozone",
            Metric::Humidity => "Humidity",
            Metric::Temperature => "Temperature",
            Metric::CarbonMonoxide => "CO",
        }
    }
}

/// The six nullable metric values carried by both readings and buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub ozone: Option<f64>,
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
    pub carbon_monoxide: Option<f64>,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Pm2_5 => self.pm2_5,
            Metric::Pm10 => self.pm10,
            Metric::Ozone => self.ozone,
            Metric::Humidity => self.humidity,
            Metric::Temperature => self.temperature,
            Metric::CarbonMonoxide => self.carbon_monoxide,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        let slot = match metric {
            Metric::Pm2_5 => &mut self.pm2_5,
            Metric::Pm10 => &mut self.pm10,
            Metric::Ozone => &mut self.ozone,
            Metric::Humidity => &mut self.humidity,
            Metric::Temperature => &mut self.temperature,
            Metric::CarbonMonoxide => &mut self.carbon_monoxide,
        };
        *slot = value;
    }
}

/// A single normalized sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Readings in feed order. Not guaranteed to be sorted or de-duplicated.
pub type Series = Vec<Reading>;

/// Mean of each metric over `[start, start + interval)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    /// Number of readings that fell into this bucket.
    pub count: usize,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Anything positioned on the time axis; lets filters work on readings and buckets alike.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for Reading {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for Bucket {
    fn timestamp(&self) -> DateTime<Utc> {
        self.start
    }
}
