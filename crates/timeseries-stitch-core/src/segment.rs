//! Quality segmentation of a merged table.
//!
//! [`QualitySegmenter`] turns one merged [`Table`] into the contiguous,
//! trustworthy stretches of data that are long enough to model on. Stages run
//! in this order, each on the previous stage's output:
//!
//! 1. *Idle-sample removal* (optional, off by default): drop rows where the
//!    trailing `N` yield readings are all present and sum to exactly zero.
//! 2. *Saturation masking*: where `level` exceeds the threshold, `yield`
//!    becomes missing; the `level` column is then dropped. Rows are kept.
//! 3. *Gap splitting*: cut the timeline wherever two consecutive rows are
//!    further apart than the nominal sampling interval.
//! 4. *Minimum-duration filtering*: keep a piece only if
//!    `last - first > min_duration` (strict). Short pieces are discarded
//!    whole.

use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{step::Step, table::Table};

/// Default `level` above which `yield` is considered unreliable.
pub const DEFAULT_SATURATION_THRESHOLD: f64 = 99.0;

/// Default nominal spacing between samples.
pub const DEFAULT_SAMPLE_INTERVAL: Step = Step::from_minutes(5);

/// Default minimum segment span.
pub const DEFAULT_MIN_DURATION: Step = Step::from_minutes(4 * 60);

/// Default trailing window for idle-sample removal when it is enabled.
pub const DEFAULT_IDLE_SAMPLES: usize = 12;

/// Errors raised by the segmenter.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum SegmentError {
    /// A required column is absent from the input table.
    #[snafu(display("Required column {column} is missing from the table"))]
    MissingColumn {
        /// Name of the missing column.
        column: String,
    },
}

/// Parameters for [`QualitySegmenter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Column holding the production reading.
    pub yield_column: String,
    /// Column holding the state-of-charge reading.
    pub level_column: String,
    /// `level` values strictly above this mask `yield`.
    pub saturation_threshold: f64,
    /// Expected spacing between samples; larger gaps split segments.
    pub sample_interval: Step,
    /// Segments must span strictly more than this.
    pub min_duration: Step,
    /// Trailing window for idle-sample removal; `None` disables the stage.
    pub idle_samples: Option<NonZeroUsize>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig {
            yield_column: "yield".to_string(),
            level_column: "level".to_string(),
            saturation_threshold: DEFAULT_SATURATION_THRESHOLD,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            min_duration: DEFAULT_MIN_DURATION,
            idle_samples: None,
        }
    }
}

/// A contiguous, gap-free slice of a table spanning more than the minimum
/// duration. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    table: Table,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Segment {
    fn from_table(table: Table) -> Option<Self> {
        let start = table.start()?;
        let end = table.end()?;
        Some(Segment { table, start, end })
    }

    /// First timestamp.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Last timestamp.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `end - start`.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when the segment has no rows, which a segmenter never produces.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The segment's rows.
    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Take the segment's rows.
    pub fn into_table(self) -> Table {
        self.table
    }
}

/// Masks, splits and filters a merged table into usable segments.
#[derive(Debug, Clone, Default)]
pub struct QualitySegmenter {
    config: SegmenterConfig,
}

impl QualitySegmenter {
    /// Segmenter with the given parameters.
    pub fn new(config: SegmenterConfig) -> Self {
        QualitySegmenter { config }
    }

    /// Active parameters.
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Run every enabled stage over `table`.
    ///
    /// A table without rows yields no segments, whatever its columns.
    pub fn segment(&self, table: Table) -> Result<Vec<Segment>, SegmentError> {
        let cfg = &self.config;
        if table.is_empty() {
            debug!("nothing to segment");
            return Ok(Vec::new());
        }
        for column in [&cfg.yield_column, &cfg.level_column] {
            ensure!(table.has_column(column), MissingColumnSnafu { column });
        }

        let rows = table.len();
        let table = match cfg.idle_samples {
            Some(window) => remove_idle_samples(table, &cfg.yield_column, window)?,
            None => table,
        };
        let table = mask_saturated(
            table,
            &cfg.yield_column,
            &cfg.level_column,
            cfg.saturation_threshold,
        )?;
        let pieces = split_at_gaps(&table, cfg.sample_interval);
        let candidates = pieces.len();
        let segments = retain_long_segments(pieces, cfg.min_duration);

        info!(
            "segmented {rows} rows into {} of {candidates} candidate segments (min duration {})",
            segments.len(),
            cfg.min_duration
        );
        Ok(segments)
    }
}

/// Drop rows whose trailing `window` yield readings are all present and sum
/// to exactly zero.
///
/// The first `window - 1` rows never have a full trailing window and are
/// always kept, as are rows whose window contains a missing reading.
pub fn remove_idle_samples(
    table: Table,
    yield_column: &str,
    window: NonZeroUsize,
) -> Result<Table, SegmentError> {
    let values = table.column(yield_column).context(MissingColumnSnafu {
        column: yield_column,
    })?;
    let n = window.get();

    let keep: Vec<bool> = (0..values.len())
        .map(|i| {
            if i + 1 < n {
                return true;
            }
            let sum: Option<f64> = values[i + 1 - n..=i].iter().copied().sum();
            sum != Some(0.0)
        })
        .collect();

    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        debug!("dropping {dropped} idle row(s) (window {n})");
    }
    Ok(table.retain_rows(&keep))
}

/// Replace `yield` with missing wherever `level > threshold`, then drop
/// `level`.
pub fn mask_saturated(
    mut table: Table,
    yield_column: &str,
    level_column: &str,
    threshold: f64,
) -> Result<Table, SegmentError> {
    ensure!(
        table.has_column(yield_column),
        MissingColumnSnafu {
            column: yield_column
        }
    );
    let level = table.drop_column(level_column).context(MissingColumnSnafu {
        column: level_column,
    })?;
    let yields = table.column_mut(yield_column).context(MissingColumnSnafu {
        column: yield_column,
    })?;

    let mut masked = 0usize;
    for (value, level) in yields.iter_mut().zip(level.values()) {
        if level.is_some_and(|l| l > threshold) {
            if value.is_some() {
                masked += 1;
            }
            *value = None;
        }
    }

    if masked > 0 {
        debug!("masked {masked} {yield_column} reading(s) with {level_column} > {threshold}");
    }
    Ok(table)
}

/// Partition `table` wherever consecutive rows are more than `interval`
/// apart. An empty table yields no pieces.
pub fn split_at_gaps(table: &Table, interval: Step) -> Vec<Table> {
    let limit = interval.as_duration();
    let timeline = table.timeline();

    let mut pieces = Vec::new();
    let mut start = 0;
    for idx in 1..timeline.len() {
        if timeline[idx] - timeline[idx - 1] > limit {
            pieces.push(table.slice(start..idx));
            start = idx;
        }
    }
    if start < timeline.len() {
        pieces.push(table.slice(start..timeline.len()));
    }
    pieces
}

/// Keep the pieces whose span strictly exceeds `min_duration`.
pub fn retain_long_segments(pieces: Vec<Table>, min_duration: Step) -> Vec<Segment> {
    let min = min_duration.as_duration();
    pieces
        .into_iter()
        .filter_map(Segment::from_table)
        .filter(|segment| segment.duration() > min)
        .collect()
}
