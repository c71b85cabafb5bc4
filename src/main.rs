//! CLI entry point for the air-quality feed tool.
//!
//! Fetches the sensor feed, normalizes and optionally resamples it, and
//! prints or exports the selected view. Also sends on/off commands to the
//! device.

use air_quality_feed::{
    aggregate::Interval,
    config::FeedConfig,
    control::send_switch,
    fetch::{BasicClient, HttpClient, auth::UrlParam},
    filter::FilterSpec,
    output::{append_csv, print_json, print_pretty, write_csv},
    pipeline::{Pipeline, Shape, Table},
    summary::{latest, summarize},
};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "aq_feed")]
#[command(about = "Fetch, resample and filter an air-quality sensor feed", long_about = None)]
struct Cli {
    /// Feed endpoint (overrides AQ_FEED_URL)
    #[arg(long, global = true)]
    feed_url: Option<String>,

    /// Number of most recent records to request (overrides AQ_FEED_RESULTS)
    #[arg(short = 'n', long, global = true)]
    results: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ViewArgs {
    /// Resample into buckets of this many hours
    #[arg(short = 'i', long)]
    interval_hours: Option<i64>,

    /// Keep only this calendar year
    #[arg(long)]
    year: Option<i32>,

    /// Keep only this month (requires --year)
    #[arg(long)]
    month: Option<u32>,

    /// Keep only this UTC date (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Range start, inclusive (RFC 3339)
    #[arg(long, requires = "to")]
    from: Option<DateTime<Utc>>,

    /// Range end, exclusive (RFC 3339)
    #[arg(long, requires = "from")]
    to: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the feed and show the selected view
    Show {
        #[command(flatten)]
        view: ViewArgs,

        /// CSV file to write the view to
        #[arg(short, long)]
        output: Option<String>,

        /// Log the view as JSON instead of the pretty-printed rows
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Simulate a paused data flow: nothing is fetched
        #[arg(long, default_value_t = false)]
        paused: bool,
    },
    /// List the years, months and dates present in the feed
    Options {
        /// Resample before listing
        #[arg(short = 'i', long)]
        interval_hours: Option<i64>,
    },
    /// Per-metric statistics and the latest entries
    Summary {
        /// How many of the latest entries to show
        #[arg(short, long, default_value_t = 10)]
        latest: usize,
    },
    /// Sample the feed repeatedly through the cache
    Watch {
        #[command(flatten)]
        view: ViewArgs,

        /// Query the feed every X seconds
        #[arg(short = 'r', long, default_value_t = 60)]
        sample_rate: u64,

        /// Number of samples to collect (0 = infinite)
        #[arg(short = 's', long, default_value_t = 1)]
        num_samples: usize,

        /// CSV file to append fresh samples to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Switch the remote device on or off
    Control {
        #[arg(value_enum)]
        state: SwitchState,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SwitchState {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/aq_feed.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("aq_feed.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = FeedConfig::from_env()?;
    if let Some(url) = cli.feed_url {
        config.feed_url = url;
    }
    if let Some(results) = cli.results {
        config.results = results;
    }

    match cli.command {
        Commands::Show {
            view,
            output,
            json,
            paused,
        } => {
            let pipeline = build_pipeline(&config)?;
            let shape = shape(view.interval_hours)?;
            let spec = filter_spec(&view)?;

            let snapshot = match pipeline.load(config.results, shape, !paused).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    warn!("Data flow is paused. Nothing was fetched.");
                    return Ok(());
                }
                Err(e) => {
                    error!(status = ?e.status_code(), "Failed to fetch data: {e}");
                    return Err(e.into());
                }
            };

            if snapshot.partial() {
                warn!(
                    dropped = snapshot.report.dropped_records(),
                    nulled = snapshot.report.nulled_metrics(),
                    "Some feed values could not be parsed and were skipped"
                );
            }

            let view = snapshot.table.select(&spec);
            render(&view, json)?;

            if let Some(path) = output {
                write_csv(&path, &view)?;
                info!(path = %path, rows = view.len(), "View written");
            }
        }
        Commands::Options { interval_hours } => {
            let pipeline = build_pipeline(&config)?;
            let snapshot = pipeline
                .load(config.results, shape(interval_hours)?, true)
                .await?
                .context("data flow unexpectedly paused")?;

            print_json(&snapshot.table.options())?;
        }
        Commands::Summary { latest: n } => {
            let pipeline = build_pipeline(&config)?;
            let snapshot = pipeline
                .load(config.results, Shape::Raw, true)
                .await?
                .context("data flow unexpectedly paused")?;

            let Table::Readings(series) = &snapshot.table else {
                bail!("summary needs raw readings");
            };

            for summary in summarize(series) {
                info!(
                    metric = summary.metric.label(),
                    count = summary.count,
                    missing = summary.missing,
                    mean = ?summary.mean,
                    stddev = ?summary.stddev,
                    min = ?summary.min,
                    max = ?summary.max,
                    latest = ?summary.latest,
                    "Metric summary"
                );
            }

            render(&Table::Readings(latest(series, n)), false)?;
        }
        Commands::Watch {
            view,
            sample_rate,
            num_samples,
            output,
        } => {
            watch(&config, &view, sample_rate, num_samples, output.as_deref()).await?;
        }
        Commands::Control { state } => {
            let url = config
                .control_url
                .as_deref()
                .context("AQ_CONTROL_URL must be set")?;
            let base = BasicClient::with_timeout(config.fetch_timeout)?;
            let on = matches!(state, SwitchState::On);

            let result = match &config.write_key {
                Some(key) => {
                    let client = UrlParam::api_key(base, key.clone());
                    send_switch(&client, url, &config.control_field, on).await
                }
                None => send_switch(&base, url, &config.control_field, on).await,
            };

            if let Err(e) = result {
                error!(error = %e, "Control command failed");
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn build_pipeline(config: &FeedConfig) -> Result<Pipeline<Box<dyn HttpClient>>> {
    let base = BasicClient::with_timeout(config.fetch_timeout)?;
    let client: Box<dyn HttpClient> = match &config.read_key {
        Some(key) => Box::new(UrlParam::api_key(base, key.clone())),
        None => Box::new(base),
    };

    Ok(Pipeline::new(client, config.feed_url.clone(), config.cache_ttl))
}

fn shape(interval_hours: Option<i64>) -> Result<Shape> {
    match interval_hours {
        None => Ok(Shape::Raw),
        Some(hours) => Interval::hours(hours)
            .map(Shape::Resampled)
            .with_context(|| format!("interval must be a positive number of hours, got {hours}")),
    }
}

fn filter_spec(view: &ViewArgs) -> Result<FilterSpec> {
    if let Some(date) = view.date {
        return Ok(FilterSpec::Date(date));
    }
    if let (Some(start), Some(end)) = (view.from, view.to) {
        if start >= end {
            bail!("--from must be before --to");
        }
        return Ok(FilterSpec::Range { start, end });
    }
    match (view.year, view.month) {
        (Some(year), Some(month)) if (1..=12).contains(&month) => {
            Ok(FilterSpec::YearMonth { year, month })
        }
        (_, Some(month)) if !(1..=12).contains(&month) => bail!("--month must be 1-12"),
        (None, Some(_)) => bail!("--month requires --year"),
        (Some(year), None) => Ok(FilterSpec::Year(year)),
        _ => Ok(FilterSpec::All),
    }
}

fn render(table: &Table, json: bool) -> Result<()> {
    if table.is_empty() {
        warn!("No data available for this selection");
        return Ok(());
    }

    info!(rows = table.len(), "Selected view");
    if json {
        print_json(table)?;
    } else {
        print_pretty(table);
    }
    Ok(())
}

/// Loads the feed every `sample_rate` seconds. Loads inside the cache TTL
/// are served without a network call; only fresh snapshots are appended.
#[tracing::instrument(skip(config, view, output))]
async fn watch(
    config: &FeedConfig,
    view: &ViewArgs,
    sample_rate: u64,
    num_samples: usize,
    output: Option<&str>,
) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let shape = shape(view.interval_hours)?;
    let spec = filter_spec(view)?;

    if num_samples == 0 {
        info!(sample_rate, "Sampling infinitely. Press Ctrl+C to stop.");
    } else {
        info!(num_samples, sample_rate, "Starting sample collection");
    }

    let mut sample_count = 0;
    let mut last_fetched_at: Option<DateTime<Utc>> = None;

    loop {
        if num_samples > 0 && sample_count >= num_samples {
            break;
        }
        sample_count += 1;

        match pipeline.load(config.results, shape, true).await {
            Ok(Some(snapshot)) => {
                let fresh = last_fetched_at != Some(snapshot.fetched_at);
                last_fetched_at = Some(snapshot.fetched_at);

                let view = snapshot.table.select(&spec);
                info!(
                    sample = sample_count,
                    fresh,
                    rows = view.len(),
                    partial = snapshot.partial(),
                    "Sample collected"
                );

                if fresh {
                    if let Some(path) = output {
                        if let Err(e) = append_csv(path, &view) {
                            error!(error = %e, "Failed to append sample");
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Feed fetch failed"),
        }

        if num_samples == 0 || sample_count < num_samples {
            tokio::time::sleep(tokio::time::Duration::from_secs(sample_rate)).await;
        }
    }

    info!(samples = sample_count, "Finished sampling");
    Ok(())
}
