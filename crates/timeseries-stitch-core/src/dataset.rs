//! Assembly of the modelling dataset from metric queries.
//!
//! [`DatasetBuilder::build`] fetches every configured query over the
//! requested range, merges the results nearest-timestamp in query order,
//! reindexes onto a uniform grid and enriches each grid row with cyclical
//! time features and the sun's position. Configured renames are applied last,
//! so the output names (`yield`, `level`, ...) are what the segmenter expects.
//!
//! [`DatasetBuilder::build_observed`] does the same without the grid.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    fetch::{ChunkedRangeFetcher, FetchError},
    merge::{MergeError, SeriesMerger},
    source::RangeSource,
    step::Step,
    table::{Table, TableError},
    window::{QueryWindow, WindowError},
};

pub mod features;
pub mod solar;

pub use features::{TIME_FEATURE_COLUMNS, add_time_features, time_features};
pub use solar::{NoaaSolarPosition, Observer, SolarPosition, SunPosition};

/// Column holding the sun's elevation in degrees.
pub const ELEVATION_COLUMN: &str = "elevation";

/// Column holding the sun's azimuth in degrees.
pub const AZIMUTH_COLUMN: &str = "azimuth";

/// Default production query.
pub const DEFAULT_YIELD_QUERY: &str = r#"ha_sensor_power_w{entity="sensor.solarbank_2_e1600_pro_solarleistung", retention="inf"}"#;

/// Default state-of-charge query.
pub const DEFAULT_LEVEL_QUERY: &str = r#"ha_sensor_battery_percent{entity="sensor.solarbank_2_e1600_pro_ladestand",retention="inf"}"#;

/// Errors raised while assembling a dataset.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DatasetError {
    /// The requested range is not a valid window.
    #[snafu(display("Invalid dataset range: {source}"))]
    Range {
        /// Underlying window error.
        source: WindowError,
    },

    /// Fetching one of the metric queries failed.
    #[snafu(display("Failed to fetch {query:?}: {source}"))]
    Fetch {
        /// Query that failed.
        query: String,
        /// Underlying fetch error.
        source: FetchError,
    },

    /// The per-query tables could not be merged.
    #[snafu(display("Failed to merge metric tables: {source}"))]
    Merge {
        /// Underlying merge error.
        source: MergeError,
    },

    /// Reindexing, enrichment or renaming broke a table invariant.
    #[snafu(display("Failed to shape dataset table: {source}"))]
    Shape {
        /// Underlying table error.
        source: TableError,
    },
}

/// What to fetch and how to shape it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Metric queries, merged in this order. The first defines the rows.
    pub queries: Vec<String>,
    /// Column renames applied together after enrichment, `from -> to`.
    pub renames: BTreeMap<String, String>,
    /// Where to compute the sun's position from. Solar columns are omitted
    /// when unset.
    pub observer: Option<Observer>,
    /// Grid spacing and query step.
    pub interval: Step,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let renames = [
            ("Solarbank 2 E1600 Pro Solarleistung", "yield"),
            ("Solarbank 2 E1600 Pro Ladestand", "level"),
            ("Sun Solare Elevation", ELEVATION_COLUMN),
            ("Sun Solarer Azimut", AZIMUTH_COLUMN),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        DatasetConfig {
            queries: vec![
                DEFAULT_YIELD_QUERY.to_string(),
                DEFAULT_LEVEL_QUERY.to_string(),
            ],
            renames,
            observer: None,
            interval: Step::from_minutes(5),
        }
    }
}

/// Fetches, merges and enriches the configured metrics.
#[derive(Debug)]
pub struct DatasetBuilder<S, P = NoaaSolarPosition> {
    fetcher: ChunkedRangeFetcher<S>,
    config: DatasetConfig,
    solar: P,
}

impl<S: RangeSource> DatasetBuilder<S> {
    /// Builder using the NOAA solar equations.
    pub fn new(fetcher: ChunkedRangeFetcher<S>, config: DatasetConfig) -> Self {
        DatasetBuilder {
            fetcher,
            config,
            solar: NoaaSolarPosition,
        }
    }
}

impl<S: RangeSource, P: SolarPosition> DatasetBuilder<S, P> {
    /// Swap the solar position model.
    pub fn with_solar_position<Q: SolarPosition>(self, solar: Q) -> DatasetBuilder<S, Q> {
        DatasetBuilder {
            fetcher: self.fetcher,
            config: self.config,
            solar,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Fetch every configured query over `[start, end]` and merge the
    /// results in query order, without reindexing or enrichment.
    pub async fn fetch_merged(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Table, DatasetError> {
        let window = QueryWindow::new(start, end, self.config.interval).context(RangeSnafu)?;

        let mut tables = Vec::with_capacity(self.config.queries.len());
        for query in &self.config.queries {
            let table = self
                .fetcher
                .fetch(query, &window)
                .await
                .context(FetchSnafu { query })?;
            debug!("{query:?}: {} rows", table.len());
            tables.push(table);
        }

        let merged = SeriesMerger::merge_tables(tables).context(MergeSnafu)?;
        if merged.is_empty() {
            warn!("no data in {window}; dataset is empty");
        }
        Ok(merged)
    }

    /// Assemble the dataset for `[start, end]` on a uniform grid.
    ///
    /// Grid rows without an observation hold missing values, so acquisition
    /// gaps no longer show up as timeline gaps. Returns an empty table when
    /// the first query has no data in range.
    pub async fn build(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Table, DatasetError> {
        let merged = self.fetch_merged(start, end).await?;
        let Some(anchor) = merged.start() else {
            return Ok(merged);
        };

        let grid = uniform_grid(anchor, start, end, self.config.interval);
        let mut table = merged.reindex(&grid).context(ShapeSnafu)?;
        self.enrich(&mut table)?;
        info!(
            "assembled {} grid rows x {} columns",
            table.len(),
            table.columns().len()
        );
        Ok(table)
    }

    /// Assemble the dataset for `[start, end]` on the observed timeline.
    ///
    /// Same columns as [`build`](Self::build), but only rows the first query
    /// actually returned. This is the input [`QualitySegmenter`] expects,
    /// since gaps are still visible.
    ///
    /// [`QualitySegmenter`]: crate::segment::QualitySegmenter
    pub async fn build_observed(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Table, DatasetError> {
        let mut table = self.fetch_merged(start, end).await?;
        if table.is_empty() {
            return Ok(table);
        }
        self.enrich(&mut table)?;
        info!(
            "assembled {} observed rows x {} columns",
            table.len(),
            table.columns().len()
        );
        Ok(table)
    }

    fn enrich(&self, table: &mut Table) -> Result<(), DatasetError> {
        add_time_features(table).context(ShapeSnafu)?;
        if let Some(observer) = &self.config.observer {
            self.add_solar_columns(table, observer)
                .context(ShapeSnafu)?;
        }
        table
            .rename_columns(&self.config.renames)
            .context(ShapeSnafu)
    }

    fn add_solar_columns(&self, table: &mut Table, observer: &Observer) -> Result<(), TableError> {
        let (elevation, azimuth): (Vec<_>, Vec<_>) = table
            .timeline()
            .iter()
            .map(|at| {
                let sun = self.solar.position(observer, *at);
                (Some(sun.elevation), Some(sun.azimuth))
            })
            .unzip();
        table.insert_column(ELEVATION_COLUMN, elevation)?;
        table.insert_column(AZIMUTH_COLUMN, azimuth)
    }
}

/// Instants `anchor + k * step` within `[start, end]`, ascending.
///
/// The grid keeps the phase of `anchor` (the first observed timestamp), so
/// observed samples land exactly on grid rows. It begins at the earliest such
/// instant not before `start`.
pub fn uniform_grid(
    anchor: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Step,
) -> Vec<DateTime<Utc>> {
    let step_secs = step.as_secs();
    let back = (anchor - start).num_seconds().div_euclid(step_secs);
    let first = anchor - Duration::seconds(back * step_secs);

    let mut grid = Vec::new();
    let mut at = first;
    while at <= end {
        grid.push(at);
        at += step.as_duration();
    }
    grid
}
