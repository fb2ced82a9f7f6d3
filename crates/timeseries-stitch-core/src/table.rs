//! Named columns aligned on one shared timeline.
//!
//! A [`Table`] is the in-memory result of a fetch. It upholds three
//! invariants that every constructor and mutator preserves:
//!
//! - the timeline is strictly increasing,
//! - every column has exactly one value per timeline entry,
//! - column names are unique within the table.
//!
//! Column order is insertion order and is part of the observable result.

use std::{
    collections::{BTreeMap, HashSet},
    ops::Range,
};

use chrono::{DateTime, Utc};
use snafu::prelude::*;

mod record_batch;

pub use record_batch::TIMESTAMP_COLUMN;

/// Errors raised when a table operation would break an invariant.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// A column with this name already exists.
    #[snafu(display("Duplicate column name {name}"))]
    DuplicateColumn {
        /// The conflicting column name.
        name: String,
    },

    /// A column's length does not match the timeline.
    #[snafu(display("Column {name} has {actual} values, expected {expected}"))]
    LengthMismatch {
        /// Column name.
        name: String,
        /// Timeline length.
        expected: usize,
        /// Column length.
        actual: usize,
    },

    /// The timeline is not strictly increasing.
    #[snafu(display(
        "Timeline is not strictly increasing at row {position}: {previous} followed by {current}"
    ))]
    UnorderedTimeline {
        /// Row index of the offending timestamp.
        position: usize,
        /// Timestamp of the preceding row.
        previous: DateTime<Utc>,
        /// Offending timestamp.
        current: DateTime<Utc>,
    },
}

/// One named column of optional readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    values: Vec<Option<f64>>,
}

impl Column {
    /// Create a column.
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Column {
            name: name.into(),
            values,
        }
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values, one per timeline row.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }
}

/// Multiple named columns aligned on one strictly increasing timeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    timeline: Vec<DateTime<Utc>>,
    columns: Vec<Column>,
}

impl Table {
    /// A table with no rows and no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table, validating every invariant.
    pub fn new(timeline: Vec<DateTime<Utc>>, columns: Vec<Column>) -> Result<Self, TableError> {
        if let Some(position) = timeline.windows(2).position(|w| w[0] >= w[1]) {
            return UnorderedTimelineSnafu {
                position: position + 1,
                previous: timeline[position],
                current: timeline[position + 1],
            }
            .fail();
        }

        let mut table = Table {
            timeline,
            columns: Vec::with_capacity(columns.len()),
        };
        for column in columns {
            table.insert_column(column.name, column.values)?;
        }
        Ok(table)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    /// The shared timeline.
    pub fn timeline(&self) -> &[DateTime<Utc>] {
        &self.timeline
    }

    /// First timestamp, if any.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.timeline.first().copied()
    }

    /// Last timestamp, if any.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.timeline.last().copied()
    }

    /// All columns in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// True when a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Values of the named column.
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Mutable values of the named column.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut [Option<f64>]> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| c.values.as_mut_slice())
    }

    /// Value at `row` of the named column; `None` for a missing reading,
    /// an unknown column or an out-of-range row.
    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.column(name)?.get(row).copied().flatten()
    }

    /// Rows in timeline order as `(timestamp, values in column order)`.
    pub fn iter_rows(&self) -> impl Iterator<Item = (DateTime<Utc>, Vec<Option<f64>>)> + '_ {
        self.timeline.iter().enumerate().map(|(row, ts)| {
            let values = self.columns.iter().map(|c| c.values[row]).collect();
            (*ts, values)
        })
    }

    /// Append a column at the end.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let name = name.into();
        ensure!(!self.has_column(&name), DuplicateColumnSnafu { name });
        ensure!(
            values.len() == self.timeline.len(),
            LengthMismatchSnafu {
                name,
                expected: self.timeline.len(),
                actual: values.len(),
            }
        );
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Remove a column, returning it if it existed.
    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    /// Apply a set of renames, `from -> to`, all at once.
    ///
    /// Targets are resolved against the current names before any column is
    /// renamed, so `a -> b` together with `b -> c` renames both columns.
    /// Sources that are not columns are ignored. Fails without renaming
    /// anything when two columns would end up sharing a name.
    pub fn rename_columns(&mut self, renames: &BTreeMap<String, String>) -> Result<(), TableError> {
        let targets: Vec<String> = self
            .columns
            .iter()
            .map(|c| renames.get(&c.name).unwrap_or(&c.name).clone())
            .collect();

        {
            let mut taken = HashSet::with_capacity(targets.len());
            for name in &targets {
                ensure!(taken.insert(name.as_str()), DuplicateColumnSnafu { name: name.as_str() });
            }
        }

        for (column, name) in self.columns.iter_mut().zip(targets) {
            column.name = name;
        }
        Ok(())
    }

    /// Copy out the rows in `range`.
    pub fn slice(&self, range: Range<usize>) -> Table {
        Table {
            timeline: self.timeline[range.clone()].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: c.values[range.clone()].to_vec(),
                })
                .collect(),
        }
    }

    /// Keep only the rows whose entry in `keep` is true.
    ///
    /// Rows beyond the end of `keep` are dropped.
    pub fn retain_rows(self, keep: &[bool]) -> Table {
        let mask = |idx: usize| keep.get(idx).copied().unwrap_or(false);
        let timeline = self
            .timeline
            .into_iter()
            .enumerate()
            .filter(|(i, _)| mask(*i))
            .map(|(_, ts)| ts)
            .collect();
        let columns = self
            .columns
            .into_iter()
            .map(|c| Column {
                name: c.name,
                values: c
                    .values
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| mask(*i))
                    .map(|(_, v)| v)
                    .collect(),
            })
            .collect();
        Table { timeline, columns }
    }

    /// Project this table onto a new timeline by exact timestamp match.
    ///
    /// Grid entries with no matching row get missing values in every column.
    /// `grid` must be strictly increasing.
    pub fn reindex(&self, grid: &[DateTime<Utc>]) -> Result<Table, TableError> {
        let rows: Vec<Option<usize>> = grid
            .iter()
            .map(|ts| self.timeline.binary_search(ts).ok())
            .collect();

        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: rows.iter().map(|row| row.and_then(|r| c.values[r])).collect(),
            })
            .collect();

        Table::new(grid.to_vec(), columns)
    }
}
