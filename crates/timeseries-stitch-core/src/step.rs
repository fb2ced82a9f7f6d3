//! Human-friendly sampling steps.
//!
//! A [`Step`] is a strictly positive, whole-second duration. It is used both
//! as the nominal spacing of a query grid and for the other durations the
//! pipeline is configured with (gap thresholds, minimum segment length,
//! query timeouts).
//!
//! Steps parse from compact specs such as `30s`, `5m`, `4h` or `1d` and are
//! displayed back in the largest unit that divides them evenly, so a step
//! survives a round-trip through a JSON config file unchanged.

use std::{fmt, str::FromStr};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * 60;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Errors produced when parsing a step spec (e.g. `5m`).
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ParseStepError {
    /// The spec string was empty or only whitespace.
    #[snafu(display("step spec is empty"))]
    Empty,

    /// The spec did not include a numeric value.
    #[snafu(display("step spec '{spec}' is missing a numeric value"))]
    MissingNumber {
        /// The original spec string.
        spec: String,
    },

    /// The spec did not include a required unit suffix.
    #[snafu(display("step spec '{spec}' is missing a unit suffix (expected s|m|h|d)"))]
    MissingUnit {
        /// The original spec string.
        spec: String,
    },

    /// The numeric portion of the spec failed to parse.
    #[snafu(display("invalid step value in '{spec}': {source}"))]
    InvalidNumber {
        /// The original spec string.
        spec: String,
        /// The parse error returned by `u64::from_str`.
        source: std::num::ParseIntError,
    },

    /// The step resolved to zero seconds.
    #[snafu(display("step must be > 0 (got '{spec}')"))]
    NonPositive {
        /// The original spec string.
        spec: String,
    },

    /// The step does not fit in an `i64` number of seconds.
    #[snafu(display("step '{spec}' is too large"))]
    TooLarge {
        /// The original spec string.
        spec: String,
    },

    /// The spec used an unsupported unit suffix.
    #[snafu(display("unknown step unit '{unit}' in '{spec}' (expected s|m|h|d)"))]
    UnknownUnit {
        /// The original spec string.
        spec: String,
        /// The unrecognized unit suffix.
        unit: String,
    },
}

/// A strictly positive duration measured in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Step {
    secs: i64,
}

impl Step {
    /// Build a step from a number of seconds; `None` unless `secs > 0`.
    pub fn from_secs(secs: i64) -> Option<Self> {
        (secs > 0).then_some(Step { secs })
    }

    /// Build a step of whole minutes, for use in constants.
    ///
    /// # Panics
    ///
    /// Panics if `minutes` is not positive.
    pub const fn from_minutes(minutes: i64) -> Self {
        assert!(minutes > 0, "step must be positive");
        Step { secs: minutes * 60 }
    }

    /// Build a step from a chrono duration, truncated to whole seconds.
    pub fn from_duration(duration: Duration) -> Option<Self> {
        Self::from_secs(duration.num_seconds())
    }

    /// Length of the step in seconds (always `> 0`).
    pub fn as_secs(&self) -> i64 {
        self.secs
    }

    /// Length of the step as a chrono duration.
    pub fn as_duration(&self) -> Duration {
        Duration::seconds(self.secs)
    }

    /// Length of the step as a std duration (for timers).
    pub fn as_std(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.secs.unsigned_abs())
    }

    /// Render the step the way Prometheus-style range APIs expect it (`"300s"`).
    pub fn as_query_param(&self) -> String {
        format!("{}s", self.secs)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.secs;
        if secs % SECONDS_PER_DAY == 0 {
            write!(f, "{}d", secs / SECONDS_PER_DAY)
        } else if secs % SECONDS_PER_HOUR == 0 {
            write!(f, "{}h", secs / SECONDS_PER_HOUR)
        } else if secs % SECONDS_PER_MINUTE == 0 {
            write!(f, "{}m", secs / SECONDS_PER_MINUTE)
        } else {
            write!(f, "{secs}s")
        }
    }
}

impl FromStr for Step {
    type Err = ParseStepError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let spec = input.trim();
        if spec.is_empty() {
            return Err(ParseStepError::Empty);
        }

        // Unit starts at the first alphabetic char.
        let Some(unit_start) = spec
            .char_indices()
            .find(|(_, c)| c.is_ascii_alphabetic())
            .map(|(i, _)| i)
        else {
            return MissingUnitSnafu { spec }.fail();
        };

        if unit_start == 0 {
            return MissingNumberSnafu { spec }.fail();
        }

        let (num_str, unit_str) = spec.split_at(unit_start);
        let value: u64 = num_str
            .trim()
            .parse()
            .context(InvalidNumberSnafu { spec })?;

        let unit = unit_str.trim().to_ascii_lowercase();
        let multiplier = match unit.as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => SECONDS_PER_MINUTE,
            "h" | "hr" | "hrs" | "hour" | "hours" => SECONDS_PER_HOUR,
            "d" | "day" | "days" => SECONDS_PER_DAY,
            _ => {
                return UnknownUnitSnafu {
                    spec,
                    unit: unit_str.trim(),
                }
                .fail();
            }
        };

        let secs = i64::try_from(value)
            .ok()
            .and_then(|v| v.checked_mul(multiplier))
            .context(TooLargeSnafu { spec })?;

        Step::from_secs(secs).context(NonPositiveSnafu { spec })
    }
}

impl TryFrom<String> for Step {
    type Error = ParseStepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.to_string()
    }
}
