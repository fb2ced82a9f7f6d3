//! Nearest-timestamp merging of named series into one [`Table`].
//!
//! Merging is a left-to-right "asof" join:
//!
//! - The first input defines the timeline; later inputs never add rows.
//! - For every accumulator row, each later input contributes the value of its
//!   sample nearest in time. Ties go to the earlier sample. Values are copied,
//!   never interpolated, and one sample may serve several rows.
//! - An incoming column whose name is already taken is renamed to
//!   `name_(0)`, `name_(1)`, ... (first free suffix), so nothing is ever
//!   overwritten and the final names depend only on the merge order.
//!
//! Series must arrive sorted by timestamp. A timestamp that goes backwards is
//! reported as [`MergeError::MalformedSeries`] instead of being re-sorted.
//! Consecutive duplicate timestamps are collapsed, keeping the first sample.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use snafu::prelude::*;

use crate::{
    series::Series,
    table::{Column, Table, TableError},
};

/// Errors raised while merging series.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum MergeError {
    /// A series has a timestamp earlier than its predecessor.
    #[snafu(display(
        "Series {series} is not sorted at sample {position}: {previous} followed by {current}"
    ))]
    MalformedSeries {
        /// Name of the offending series.
        series: String,
        /// Index of the out-of-order sample.
        position: usize,
        /// Timestamp of the preceding sample.
        previous: DateTime<Utc>,
        /// Out-of-order timestamp.
        current: DateTime<Utc>,
    },

    /// Building the merged table violated a table invariant.
    #[snafu(display("Merged table is inconsistent: {source}"))]
    Table {
        /// Underlying table error.
        source: TableError,
    },
}

/// Incremental left-to-right asof merger.
#[derive(Debug, Default)]
pub struct SeriesMerger {
    acc: Option<Table>,
}

impl SeriesMerger {
    /// Start an empty merge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a whole sequence of series in order.
    ///
    /// Zero series produce an empty table.
    pub fn merge_all<I>(series: I) -> Result<Table, MergeError>
    where
        I: IntoIterator<Item = Series>,
    {
        let mut merger = Self::new();
        for s in series {
            merger.push_series(s)?;
        }
        Ok(merger.finish())
    }

    /// Merge a sequence of partial tables in order.
    pub fn merge_tables<I>(tables: I) -> Result<Table, MergeError>
    where
        I: IntoIterator<Item = Table>,
    {
        let mut merger = Self::new();
        for t in tables {
            merger.push_table(t)?;
        }
        Ok(merger.finish())
    }

    /// Add one series to the merge.
    pub fn push_series(&mut self, series: Series) -> Result<(), MergeError> {
        let table = series_to_table(series)?;
        self.push_table(table)
    }

    /// Add every column of a partial table to the merge.
    ///
    /// All incoming columns share `table`'s timeline and are joined as a
    /// group.
    pub fn push_table(&mut self, table: Table) -> Result<(), MergeError> {
        let Some(acc) = self.acc.as_mut() else {
            self.acc = Some(table);
            return Ok(());
        };

        let rows: Vec<Option<usize>> = acc
            .timeline()
            .iter()
            .map(|ts| nearest_index(table.timeline(), *ts))
            .collect();

        let mut assigned: HashSet<String> = HashSet::new();
        for column in table.columns() {
            let name = disambiguate(column.name(), |candidate| {
                acc.has_column(candidate) || assigned.contains(candidate)
            });
            if name != column.name() {
                debug!("renaming incoming column {} to {name}", column.name());
            }
            assigned.insert(name.clone());

            let values = rows
                .iter()
                .map(|row| row.and_then(|r| column.values()[r]))
                .collect();
            acc.insert_column(name, values).context(TableSnafu)?;
        }

        Ok(())
    }

    /// Finish the merge; an empty merge yields an empty table.
    pub fn finish(self) -> Table {
        self.acc.unwrap_or_default()
    }
}

/// Return `name` if free, else the first free `name_(i)` for `i = 0, 1, ...`.
pub fn disambiguate<F>(name: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !taken(name) {
        return name.to_string();
    }

    let mut suffix = 0usize;
    loop {
        let candidate = format!("{name}_({suffix})");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Index of the entry in `timeline` nearest to `ts`, ties toward the earlier one.
fn nearest_index(timeline: &[DateTime<Utc>], ts: DateTime<Utc>) -> Option<usize> {
    if timeline.is_empty() {
        return None;
    }

    let after = timeline.partition_point(|t| *t < ts);
    if after == 0 {
        return Some(0);
    }
    if after == timeline.len() {
        return Some(after - 1);
    }

    let before = after - 1;
    if timeline[after] - ts < ts - timeline[before] {
        Some(after)
    } else {
        Some(before)
    }
}

/// Reject a series whose timestamps decrease anywhere.
///
/// Repeated timestamps pass; the merger keeps the first of each.
pub fn ensure_ordered(series: &Series) -> Result<(), MergeError> {
    let samples = series.samples();
    match samples
        .windows(2)
        .position(|w| w[1].timestamp < w[0].timestamp)
    {
        Some(i) => MalformedSeriesSnafu {
            series: series.name(),
            position: i + 1,
            previous: samples[i].timestamp,
            current: samples[i + 1].timestamp,
        }
        .fail(),
        None => Ok(()),
    }
}

fn series_to_table(series: Series) -> Result<Table, MergeError> {
    ensure_ordered(&series)?;
    let (name, samples) = series.into_parts();

    let mut timeline: Vec<DateTime<Utc>> = Vec::with_capacity(samples.len());
    let mut values = Vec::with_capacity(samples.len());
    let mut duplicates = 0usize;

    for sample in samples {
        if timeline.last() == Some(&sample.timestamp) {
            duplicates += 1;
            continue;
        }
        timeline.push(sample.timestamp);
        values.push(sample.value);
    }

    if duplicates > 0 {
        warn!("series {name} repeated {duplicates} timestamp(s); keeping the first sample of each");
    }

    Table::new(timeline, vec![Column::new(name, values)]).context(TableSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Sample;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn series(name: &str, points: &[(i64, f64)]) -> Series {
        Series::from_pairs(name, points.iter().map(|(t, v)| (ts(*t), *v)))
    }

    #[test]
    fn zero_series_is_empty_table() {
        let table = SeriesMerger::merge_all(Vec::<Series>::new()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 0);
    }

    #[test]
    fn first_series_defines_timeline() {
        let table = SeriesMerger::merge_all([
            series("a", &[(0, 1.0), (60, 2.0), (120, 3.0)]),
            series("b", &[(0, 10.0), (30, 15.0), (60, 20.0), (90, 25.0), (120, 30.0), (150, 35.0)]),
        ])
        .unwrap();

        assert_eq!(table.timeline(), &[ts(0), ts(60), ts(120)]);
        assert_eq!(table.column("b").unwrap(), &[Some(10.0), Some(20.0), Some(30.0)]);
    }

    #[test]
    fn joins_on_nearest_timestamp_with_ties_to_earlier() {
        let table = SeriesMerger::merge_all([
            series("a", &[(100, 1.0), (200, 2.0), (300, 3.0)]),
            // 100 is nearest 90; 200 is equidistant from 170 and 230 -> 170;
            // 300 is nearest 290.
            series("b", &[(90, 9.0), (170, 17.0), (230, 23.0), (290, 29.0)]),
        ])
        .unwrap();

        assert_eq!(table.column("b").unwrap(), &[Some(9.0), Some(17.0), Some(29.0)]);
    }

    #[test]
    fn rows_outside_incoming_range_take_edge_samples() {
        let table = SeriesMerger::merge_all([
            series("a", &[(0, 1.0), (100, 2.0), (200, 3.0)]),
            series("b", &[(100, 5.0)]),
        ])
        .unwrap();
        assert_eq!(table.column("b").unwrap(), &[Some(5.0), Some(5.0), Some(5.0)]);
    }

    #[test]
    fn empty_incoming_series_adds_missing_column() {
        let table =
            SeriesMerger::merge_all([series("a", &[(0, 1.0)]), series("b", &[])]).unwrap();
        assert_eq!(table.column("b").unwrap(), &[None]);
    }

    #[test]
    fn colliding_names_get_deterministic_suffixes() {
        let inputs = || {
            vec![
                series("power", &[(0, 1.0)]),
                series("power", &[(0, 2.0)]),
                series("power", &[(0, 3.0)]),
                series("power_(0)", &[(0, 4.0)]),
            ]
        };

        let first = SeriesMerger::merge_all(inputs()).unwrap();
        let second = SeriesMerger::merge_all(inputs()).unwrap();

        let names: Vec<&str> = first.column_names().collect();
        assert_eq!(names, vec!["power", "power_(0)", "power_(1)", "power_(0)_(0)"]);
        assert_eq!(names, second.column_names().collect::<Vec<_>>());

        assert_eq!(first.value("power", 0), Some(1.0));
        assert_eq!(first.value("power_(0)", 0), Some(2.0));
        assert_eq!(first.value("power_(1)", 0), Some(3.0));
        assert_eq!(first.value("power_(0)_(0)", 0), Some(4.0));
    }

    #[test]
    fn collisions_within_one_incoming_table_stay_unique() {
        let acc = Table::new(vec![ts(0)], vec![Column::new("a", vec![Some(1.0)])]).unwrap();
        let incoming = Table::new(
            vec![ts(0)],
            vec![
                Column::new("a", vec![Some(2.0)]),
                Column::new("a_(0)", vec![Some(3.0)]),
            ],
        )
        .unwrap();

        let merged = SeriesMerger::merge_tables([acc, incoming]).unwrap();
        let names: Vec<&str> = merged.column_names().collect();
        assert_eq!(names, vec!["a", "a_(0)", "a_(0)_(0)"]);
        assert_eq!(merged.value("a_(0)_(0)", 0), Some(3.0));
    }

    #[test]
    fn unsorted_series_is_rejected() {
        let err = SeriesMerger::merge_all([series("a", &[(0, 1.0), (60, 2.0), (30, 3.0)])])
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::MalformedSeries {
                series: "a".into(),
                position: 2,
                previous: ts(60),
                current: ts(30),
            }
        );
    }

    #[test]
    fn duplicate_timestamps_keep_first_sample() {
        let s = Series::new(
            "a",
            vec![
                Sample::new(ts(0), 1.0),
                Sample::new(ts(0), 2.0),
                Sample::new(ts(60), 3.0),
            ],
        );
        let table = SeriesMerger::merge_all([s]).unwrap();
        assert_eq!(table.timeline(), &[ts(0), ts(60)]);
        assert_eq!(table.column("a").unwrap(), &[Some(1.0), Some(3.0)]);
    }

    #[test]
    fn disambiguate_returns_first_free_suffix() {
        let taken = ["x", "x_(0)", "x_(1)"];
        assert_eq!(disambiguate("x", |c| taken.contains(&c)), "x_(2)");
        assert_eq!(disambiguate("y", |c| taken.contains(&c)), "y");
    }
}
