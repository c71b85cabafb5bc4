//! Runtime configuration read from the environment (and `.env`).
//!
//! | Variable                | Default                                                   |
//! |-------------------------|-----------------------------------------------------------|
//! | `AQ_FEED_URL`           | `https://api.thingspeak.com/channels/1596152/feeds.json`  |
//! | `AQ_FEED_RESULTS`       | `10`                                                      |
//! | `AQ_FEED_READ_KEY`      | unset                                                     |
//! | `AQ_CACHE_TTL_SECS`     | `3600`                                                    |
//! | `AQ_FETCH_TIMEOUT_SECS` | `30`                                                      |
//! | `AQ_CONTROL_URL`        | unset                                                     |
//! | `AQ_CONTROL_FIELD`      | `field1`                                                  |
//! | `AQ_WRITE_KEY`          | unset                                                     |

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_FEED_URL: &str = "https://api.thingspeak.com/channels/1596152/feeds.json";

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub feed_url: String,
    pub results: usize,
    pub read_key: Option<String>,
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
    pub control_url: Option<String>,
    pub control_field: String,
    pub write_key: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            results: 10,
            read_key: None,
            cache_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(30),
            control_url: None,
            control_field: "field1".to_string(),
            write_key: None,
        }
    }
}

impl FeedConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset or blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            feed_url: get("AQ_FEED_URL").unwrap_or(defaults.feed_url),
            results: parse_var(&get, "AQ_FEED_RESULTS")?.unwrap_or(defaults.results),
            read_key: get("AQ_FEED_READ_KEY"),
            cache_ttl: parse_var(&get, "AQ_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            fetch_timeout: parse_var(&get, "AQ_FETCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            control_url: get("AQ_CONTROL_URL"),
            control_field: get("AQ_CONTROL_FIELD").unwrap_or(defaults.control_field),
            write_key: get("AQ_WRITE_KEY"),
        })
    }
}

fn parse_var<T, G>(get: &G, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{name} must be a number, got '{raw}'"))
        })
        .transpose()
}
