//! CLI tool for fetching, stitching and segmenting historical time series.

mod error;
mod output;

use std::{num::NonZeroUsize, path::PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use snafu::{OptionExt, ResultExt};
use timeseries_stitch_core::{
    DatasetBuilder, PipelineConfig, QualitySegmenter, QueryWindow, RangeSource, ReplaySource,
    dataset::Observer, segment::DEFAULT_IDLE_SAMPLES, step::Step,
};

use crate::{
    error::{
        CliResult, DatasetSnafu, FetchSnafu, InvalidRangeSnafu, InvalidStepSnafu,
        InvalidTimestampSnafu, LoadConfigSnafu, LoadReplaySnafu, SegmentSnafu,
    },
    output::{OutputFormat, OutputOpts, TimeFormat},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    Preview,
    Csv,
    Jsonl,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(v: OutputFormatArg) -> Self {
        match v {
            OutputFormatArg::Preview => OutputFormat::Preview,
            OutputFormatArg::Csv => OutputFormat::Csv,
            OutputFormatArg::Jsonl => OutputFormat::Jsonl,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TimeFormatArg {
    Rfc3339,
    Unix,
}

impl From<TimeFormatArg> for TimeFormat {
    fn from(v: TimeFormatArg) -> Self {
        match v {
            TimeFormatArg::Rfc3339 => TimeFormat::Rfc3339,
            TimeFormatArg::Unix => TimeFormat::Unix,
        }
    }
}

#[derive(Debug, Args)]
struct RangeArgs {
    /// Window start (RFC 3339 or Unix seconds)
    #[arg(long)]
    start: String,

    /// Window end, inclusive (RFC 3339 or Unix seconds)
    #[arg(long)]
    end: String,

    /// Sampling step, e.g. 30s, 5m, 1h (default: dataset interval from config)
    #[arg(long)]
    step: Option<String>,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Pipeline config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of a Prometheus-compatible query API
    #[arg(long, conflicts_with = "replay")]
    url: Option<String>,

    /// Answer queries from a recorded JSON dump instead of a live store
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Series label used as the column name
    #[arg(long)]
    label: Option<String>,

    /// Maximum grid points per query; larger windows are chunked
    #[arg(long = "max-points")]
    max_points: Option<usize>,

    /// Chunk queries in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-query timeout, e.g. 30s
    #[arg(long)]
    timeout: Option<String>,
}

#[derive(Debug, Args)]
struct ObserverArgs {
    /// Observer latitude in degrees; enables solar position columns
    #[arg(long, requires = "longitude", allow_negative_numbers = true)]
    latitude: Option<f64>,

    /// Observer longitude in degrees east
    #[arg(long, requires = "latitude", allow_negative_numbers = true)]
    longitude: Option<f64>,

    /// Observer height above sea level in metres
    #[arg(long, default_value_t = 0.0)]
    height: f64,
}

#[derive(Debug, Args)]
struct OutputArgs {
    #[arg(long, value_enum, default_value_t = OutputFormatArg::Preview)]
    format: OutputFormatArg,

    /// How timestamps are written
    #[arg(long = "time-format", value_enum, default_value_t = TimeFormatArg::Rfc3339)]
    time_format: TimeFormatArg,

    /// Rows shown by the preview format
    #[arg(long = "max-rows", default_value_t = 10)]
    max_rows: usize,
}

impl From<&OutputArgs> for OutputOpts {
    fn from(args: &OutputArgs) -> Self {
        OutputOpts {
            format: args.format.into(),
            time_format: args.time_format.into(),
            max_rows: args.max_rows,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one query over a window, splitting it into chunks as needed
    Fetch {
        /// Query expression sent to the store
        #[arg(long)]
        query: String,

        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Assemble the enriched dataset on a uniform grid
    Dataset {
        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        observer: ObserverArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Assemble the dataset and split it into quality segments
    Segments {
        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        observer: ObserverArgs,

        /// Level above which yield readings are masked
        #[arg(long)]
        threshold: Option<f64>,

        /// Largest spacing between rows of one segment, e.g. 5m
        #[arg(long = "sample-interval")]
        sample_interval: Option<String>,

        /// Segments must span strictly more than this, e.g. 4h
        #[arg(long = "min-duration")]
        min_duration: Option<String>,

        /// Drop rows whose trailing N yield readings sum to zero
        #[arg(long = "idle-samples")]
        idle_samples: Option<NonZeroUsize>,

        /// Drop idle rows using the default trailing window of 12 readings
        #[arg(long = "drop-idle", default_value_t = false, conflicts_with = "idle_samples")]
        drop_idle: bool,

        /// Print the segment rows instead of one summary row per segment
        #[arg(long, default_value_t = false)]
        rows: bool,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Debug, Parser)]
#[command(name = "tsstitch", version, about)]
struct Cli {
    /// Log debug output to stderr
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

fn parse_timestamp(value: &str) -> CliResult<DateTime<Utc>> {
    if let Ok(secs) = value.parse::<i64>() {
        return DateTime::<Utc>::from_timestamp(secs, 0).context(InvalidTimestampSnafu { value });
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .context(InvalidTimestampSnafu { value })
}

fn parse_step(flag: &'static str, spec: &str) -> CliResult<Step> {
    spec.parse::<Step>().context(InvalidStepSnafu { flag, spec })
}

fn parse_range(range: &RangeArgs) -> CliResult<(DateTime<Utc>, DateTime<Utc>)> {
    Ok((parse_timestamp(&range.start)?, parse_timestamp(&range.end)?))
}

/// Config file (or defaults) with command-line overrides applied.
async fn load_config(source: &SourceArgs, range: &RangeArgs) -> CliResult<PipelineConfig> {
    let mut cfg = match &source.config {
        Some(path) => PipelineConfig::load(path)
            .await
            .context(LoadConfigSnafu { path })?,
        None => PipelineConfig::default(),
    };

    if let Some(url) = &source.url {
        cfg.source.url = url.clone();
    }
    if let Some(label) = &source.label {
        cfg.source.label = label.clone();
    }
    if let Some(timeout) = &source.timeout {
        cfg.source.timeout = parse_step("timeout", timeout)?;
    }
    if let Some(max_points) = source.max_points {
        cfg.fetch.max_points_per_query = max_points;
    }
    if let Some(concurrency) = source.concurrency {
        cfg.fetch.concurrency = concurrency;
    }
    if let Some(step) = &range.step {
        cfg.dataset.interval = parse_step("step", step)?;
    }
    Ok(cfg)
}

fn apply_observer(cfg: &mut PipelineConfig, observer: &ObserverArgs) {
    if let (Some(latitude), Some(longitude)) = (observer.latitude, observer.longitude) {
        cfg.dataset.observer = Some(Observer::new(latitude, longitude, observer.height));
    }
}

async fn open_source(source: &SourceArgs, cfg: &PipelineConfig) -> CliResult<Box<dyn RangeSource>> {
    match &source.replay {
        Some(path) => {
            let replay = ReplaySource::load(path)
                .await
                .context(LoadReplaySnafu { path })?;
            info!("answering queries from {}", path.display());
            Ok(Box::new(replay))
        }
        None => {
            info!("querying {}", cfg.source.url);
            Ok(Box::new(cfg.source.prometheus()))
        }
    }
}

async fn cmd_fetch(
    query: String,
    range: RangeArgs,
    source: SourceArgs,
    output: OutputArgs,
) -> CliResult<()> {
    let (start, end) = parse_range(&range)?;
    let cfg = load_config(&source, &range).await?;
    let window = QueryWindow::new(start, end, cfg.dataset.interval).context(InvalidRangeSnafu)?;

    let fetcher = cfg.chunked_fetcher(open_source(&source, &cfg).await?);
    info!("fetching {window} in {} chunk(s)", fetcher.plan(&window).len());
    let table = fetcher.fetch(&query, &window).await.context(FetchSnafu)?;

    output::print_table(&table, &OutputOpts::from(&output))
}

async fn cmd_dataset(
    range: RangeArgs,
    source: SourceArgs,
    observer: ObserverArgs,
    output: OutputArgs,
) -> CliResult<()> {
    let (start, end) = parse_range(&range)?;
    let mut cfg = load_config(&source, &range).await?;
    apply_observer(&mut cfg, &observer);

    let fetcher = cfg.chunked_fetcher(open_source(&source, &cfg).await?);
    let table = DatasetBuilder::new(fetcher, cfg.dataset.clone())
        .build(start, end)
        .await
        .context(DatasetSnafu)?;

    output::print_table(&table, &OutputOpts::from(&output))
}

struct SegmentsArgs {
    range: RangeArgs,
    source: SourceArgs,
    observer: ObserverArgs,
    threshold: Option<f64>,
    sample_interval: Option<String>,
    min_duration: Option<String>,
    idle_samples: Option<NonZeroUsize>,
    drop_idle: bool,
    rows: bool,
    output: OutputArgs,
}

async fn cmd_segments(args: SegmentsArgs) -> CliResult<()> {
    let (start, end) = parse_range(&args.range)?;
    let mut cfg = load_config(&args.source, &args.range).await?;
    apply_observer(&mut cfg, &args.observer);
    if let Some(threshold) = args.threshold {
        cfg.segmenter.saturation_threshold = threshold;
    }
    if let Some(interval) = &args.sample_interval {
        cfg.segmenter.sample_interval = parse_step("sample-interval", interval)?;
    }
    if let Some(min_duration) = &args.min_duration {
        cfg.segmenter.min_duration = parse_step("min-duration", min_duration)?;
    }
    if args.idle_samples.is_some() {
        cfg.segmenter.idle_samples = args.idle_samples;
    } else if args.drop_idle && cfg.segmenter.idle_samples.is_none() {
        cfg.segmenter.idle_samples = NonZeroUsize::new(DEFAULT_IDLE_SAMPLES);
    }

    let fetcher = cfg.chunked_fetcher(open_source(&args.source, &cfg).await?);
    let table = DatasetBuilder::new(fetcher, cfg.dataset.clone())
        .build_observed(start, end)
        .await
        .context(DatasetSnafu)?;
    let segments = QualitySegmenter::new(cfg.segmenter.clone())
        .segment(table)
        .context(SegmentSnafu)?;

    let opts: OutputOpts = (&args.output).into();
    if args.rows {
        output::print_segment_rows(&segments, &opts)
    } else {
        output::print_segment_summary(&segments, &opts)
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.cmd {
        Command::Fetch {
            query,
            range,
            source,
            output,
        } => cmd_fetch(query, range, source, output).await,

        Command::Dataset {
            range,
            source,
            observer,
            output,
        } => cmd_dataset(range, source, observer, output).await,

        Command::Segments {
            range,
            source,
            observer,
            threshold,
            sample_interval,
            min_duration,
            idle_samples,
            drop_idle,
            rows,
            output,
        } => {
            cmd_segments(SegmentsArgs {
                range,
                source,
                observer,
                threshold,
                sample_interval,
                min_duration,
                idle_samples,
                drop_idle,
                rows,
                output,
            })
            .await
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
