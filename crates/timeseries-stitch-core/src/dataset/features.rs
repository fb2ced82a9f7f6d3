//! Cyclical time-of-day and time-of-year encodings.

use std::f64::consts::TAU;

use chrono::{DateTime, Utc};

use crate::table::{Table, TableError};

/// Seconds in a day.
pub const DAY_SECONDS: f64 = 24.0 * 60.0 * 60.0;

/// Seconds in a mean Gregorian year.
pub const YEAR_SECONDS: f64 = 365.2425 * DAY_SECONDS;

/// Names of the columns added by [`add_time_features`], in insertion order.
pub const TIME_FEATURE_COLUMNS: [&str; 4] = ["day_sin", "day_cos", "year_sin", "year_cos"];

/// `[day_sin, day_cos, year_sin, year_cos]` for one instant.
pub fn time_features(at: DateTime<Utc>) -> [f64; 4] {
    let secs = at.timestamp() as f64;
    let day = secs * TAU / DAY_SECONDS;
    let year = secs * TAU / YEAR_SECONDS;
    [day.sin(), day.cos(), year.sin(), year.cos()]
}

/// Append the four cyclical time columns to `table`.
pub fn add_time_features(table: &mut Table) -> Result<(), TableError> {
    let rows: Vec<[f64; 4]> = table.timeline().iter().copied().map(time_features).collect();
    for (i, name) in TIME_FEATURE_COLUMNS.into_iter().enumerate() {
        table.insert_column(name, rows.iter().map(|r| Some(r[i])).collect())?;
    }
    Ok(())
}
