//! Named sample sequences as returned by a range query.

use chrono::{DateTime, Utc};

/// A single `(timestamp, value)` observation.
///
/// `value` is `None` when the reading is missing. Non-finite readings
/// (`NaN`, `±inf`) are normalized to `None` on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// UTC instant at second granularity.
    pub timestamp: DateTime<Utc>,
    /// The reading, if any.
    pub value: Option<f64>,
}

impl Sample {
    /// Create a sample, mapping non-finite values to missing.
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Sample {
            timestamp,
            value: value.is_finite().then_some(value),
        }
    }

    /// Create an explicitly missing sample.
    pub fn missing(timestamp: DateTime<Utc>) -> Self {
        Sample {
            timestamp,
            value: None,
        }
    }
}

/// One named sequence of samples.
///
/// Samples are expected in timestamp order; the merger verifies this rather
/// than trusting it.
///
/// The optional key identifies the same series across queries over
/// different windows (a store's full label set, a recording's position).
/// Two results may share a name but never a key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    name: String,
    key: Option<String>,
    samples: Vec<Sample>,
}

impl Series {
    /// Create a series from already-built samples.
    pub fn new(name: impl Into<String>, samples: Vec<Sample>) -> Self {
        Series {
            name: name.into(),
            key: None,
            samples,
        }
    }

    /// Attach the identity used to match this series across windows.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Create a series from `(timestamp, value)` pairs.
    pub fn from_pairs<I>(name: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (DateTime<Utc>, f64)>,
    {
        Self::new(
            name,
            pairs
                .into_iter()
                .map(|(timestamp, value)| Sample::new(timestamp, value))
                .collect(),
        )
    }

    /// Column name this series will occupy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The samples in stored order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Identity across windows; the name when no key was attached.
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }

    /// Append samples, e.g. the same series' result for a later window.
    pub fn extend_samples(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.samples.extend(samples);
    }

    /// Split into name and samples.
    pub fn into_parts(self) -> (String, Vec<Sample>) {
        (self.name, self.samples)
    }
}
