//! In-memory store that answers range queries from recorded series.
//!
//! The JSON dump format maps a query string to the series it returns:
//!
//! ```json
//! {
//!   "ha_sensor_power_w{entity=\"sensor.solar\"}": [
//!     { "name": "Solar power", "samples": [[1700000000, 12.5], [1700000300, null]] }
//!   ]
//! }
//! ```
//!
//! A query selects every stored sample inside the inclusive window. Series
//! with no sample in the window are omitted, as a real store omits them.
//! Returned series are keyed by their recorded position under the query.
//! Unknown queries return no series.

use std::{collections::BTreeMap, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use snafu::prelude::*;

use super::{RangeSource, ReplayParseSnafu, ReplayReadSnafu, SourceError, TooManyPointsSnafu};
use crate::{
    series::{Sample, Series},
    window::QueryWindow,
};

#[derive(Debug, Deserialize)]
struct RecordedSeries {
    name: String,
    #[serde(default)]
    samples: Vec<(i64, Option<f64>)>,
}

/// Recorded series keyed by query, with an optional point cap.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    recorded: BTreeMap<String, Vec<Series>>,
    max_points: Option<usize>,
}

impl ReplaySource {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `series` as (part of) the answer to `query`.
    pub fn with_series(mut self, query: impl Into<String>, series: Series) -> Self {
        self.recorded.entry(query.into()).or_default().push(series);
        self
    }

    /// Refuse queries whose window holds more than `limit` grid points.
    pub fn with_max_points(mut self, limit: usize) -> Self {
        self.max_points = Some(limit);
        self
    }

    /// Parse a JSON dump.
    pub fn from_json_str(json: &str) -> Result<Self, SourceError> {
        let dump: BTreeMap<String, Vec<RecordedSeries>> =
            serde_json::from_str(json).context(ReplayParseSnafu)?;

        let mut source = Self::new();
        for (query, series) in dump {
            for recorded in series {
                let samples = recorded
                    .samples
                    .into_iter()
                    .filter_map(|(secs, value)| {
                        let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)?;
                        Some(match value {
                            Some(v) => Sample::new(timestamp, v),
                            None => Sample::missing(timestamp),
                        })
                    })
                    .collect();
                source = source.with_series(query.clone(), Series::new(recorded.name, samples));
            }
        }
        Ok(source)
    }

    /// Load a JSON dump from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .context(ReplayReadSnafu { path })?;
        Self::from_json_str(&json)
    }
}

#[async_trait]
impl RangeSource for ReplaySource {
    async fn query_range(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Series>, SourceError> {
        if let Some(limit) = self.max_points {
            let requested = window.point_count();
            ensure!(requested <= limit, TooManyPointsSnafu { requested, limit });
        }

        let Some(recorded) = self.recorded.get(query) else {
            return Ok(Vec::new());
        };

        let (start, end) = (window.start(), window.end());
        Ok(recorded
            .iter()
            .enumerate()
            .filter_map(|(position, series)| {
                let samples: Vec<Sample> = series
                    .samples()
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end)
                    .copied()
                    .collect();
                (!samples.is_empty())
                    .then(|| Series::new(series.name(), samples).with_key(format!("#{position}")))
            })
            .collect())
    }
}
