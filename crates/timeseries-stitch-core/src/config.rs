//! Pipeline configuration file.
//!
//! Every field has a default, so `{}` is a valid configuration and a file only
//! needs to mention what it changes:
//!
//! ```json
//! {
//!   "source": { "url": "http://monitoring.local:8481/select/0/prometheus" },
//!   "fetch": { "max_points_per_query": 10000, "concurrency": 4 },
//!   "dataset": { "observer": { "latitude": 48.1, "longitude": 11.6, "height": 520 } },
//!   "segmenter": { "min_duration": "6h" }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    dataset::DatasetConfig,
    fetch::{ChunkedRangeFetcher, DEFAULT_CONCURRENCY, DEFAULT_MAX_POINTS, RangeFetcher},
    segment::SegmenterConfig,
    source::{DEFAULT_LABEL, PrometheusSource, RangeSource},
    step::Step,
};

/// Errors raised while loading a configuration file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The file could not be read.
    #[snafu(display("Failed to read config file {}: {source}", path.display()))]
    Read {
        /// Path of the file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The file is not a valid configuration.
    #[snafu(display("Failed to parse config: {source}"))]
    Parse {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Where the time-series store lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the Prometheus-compatible API.
    pub url: String,
    /// Series label used as the column name.
    pub label: String,
    /// Per-query timeout.
    pub timeout: Step,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            url: "http://localhost:9090".to_string(),
            label: DEFAULT_LABEL.to_string(),
            timeout: Step::from_minutes(1),
        }
    }
}

impl SourceConfig {
    /// HTTP client for the configured store.
    pub fn prometheus(&self) -> PrometheusSource {
        PrometheusSource::new(&self.url).with_label(&self.label)
    }
}

/// Chunking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Grid points per query; larger windows are chunked.
    pub max_points_per_query: usize,
    /// Chunk queries in flight.
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            max_points_per_query: DEFAULT_MAX_POINTS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Store location.
    pub source: SourceConfig,
    /// Chunking.
    pub fetch: FetchConfig,
    /// Queries and enrichment.
    pub dataset: DatasetConfig,
    /// Segmentation thresholds.
    pub segmenter: SegmenterConfig,
}

impl PipelineConfig {
    /// Parse a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).context(ParseSnafu)
    }

    /// Load a JSON configuration from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .context(ReadSnafu { path })?;
        Self::from_json_str(&json)
    }

    /// Chunked fetcher over `source` using the configured timeout and limits.
    pub fn chunked_fetcher<S: RangeSource>(&self, source: S) -> ChunkedRangeFetcher<S> {
        ChunkedRangeFetcher::new(RangeFetcher::new(source).with_timeout(self.source.timeout.as_std()))
            .with_max_points(self.fetch.max_points_per_query)
            .with_concurrency(self.fetch.concurrency)
    }
}
