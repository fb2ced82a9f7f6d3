use std::path::PathBuf;

use arrow::error::ArrowError;
use snafu::Snafu;
use timeseries_stitch_core::{
    config::ConfigError, dataset::DatasetError, fetch::FetchError, segment::SegmentError,
    source::SourceError, step::ParseStepError, window::WindowError,
};

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display(
        "Invalid timestamp '{value}'. Use RFC 3339 (2024-06-01T00:00:00Z) or Unix seconds."
    ))]
    InvalidTimestamp { value: String },

    #[snafu(display("Invalid --{flag} '{spec}': {source}"))]
    InvalidStep {
        flag: &'static str,
        spec: String,
        source: ParseStepError,
    },

    #[snafu(display("Invalid time range: {source}"))]
    InvalidRange { source: WindowError },

    #[snafu(display("Failed to load config {}: {source}", path.display()))]
    LoadConfig { path: PathBuf, source: ConfigError },

    #[snafu(display("Failed to load replay data {}: {source}", path.display()))]
    LoadReplay { path: PathBuf, source: SourceError },

    #[snafu(display(
        "Fetch failed: {source}{}",
        if source.is_retryable() { " (retryable)" } else { "" }
    ))]
    Fetch { source: FetchError },

    #[snafu(display("Dataset assembly failed: {source}"))]
    Dataset { source: DatasetError },

    #[snafu(display("Segmentation failed: {source}"))]
    Segment { source: SegmentError },

    #[snafu(display("Failed to encode output: {source}"))]
    Arrow { source: ArrowError },

    #[snafu(display("Failed to write output: {source}"))]
    WriteOutput { source: std::io::Error },
}
