//! Remote time-series store clients.
//!
//! A [`RangeSource`] executes one bounded range query and returns the named
//! series it produced. The store's query language and transport stay opaque
//! to the rest of the crate: the fetch layer only needs "run this query over
//! this window at this step".
//!
//! Two clients are provided:
//! - [`PrometheusSource`]: HTTP client for the Prometheus `query_range` API
//!   (also served by VictoriaMetrics, Thanos, Mimir, ...).
//! - [`ReplaySource`]: an in-memory store, optionally loaded from a JSON
//!   dump, with an optional per-query point cap.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use snafu::prelude::*;

use crate::{series::Series, window::QueryWindow};

pub mod prometheus;
pub mod replay;

pub use prometheus::{DEFAULT_LABEL, PrometheusSource};
pub use replay::ReplaySource;

/// Errors produced by store clients.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SourceError {
    /// The HTTP request could not be sent or its body could not be read.
    #[snafu(display("Request to {url} failed: {source}"))]
    Http {
        /// Endpoint that was called.
        url: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },

    /// The store answered with a non-success HTTP status.
    #[snafu(display("Request to {url} returned HTTP {status}: {body}"))]
    Status {
        /// Endpoint that was called.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// The store reported a query error in its response payload.
    #[snafu(display("Store rejected query ({error_type}): {error}"))]
    Api {
        /// Error category reported by the store.
        error_type: String,
        /// Error message reported by the store.
        error: String,
    },

    /// The response payload is not valid JSON of the expected shape.
    #[snafu(display("Failed to decode store response: {source}"))]
    Decode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The response is not a range-vector (`matrix`) result.
    #[snafu(display("Unexpected result type {result_type} (expected matrix)"))]
    UnexpectedResultType {
        /// Result type reported by the store.
        result_type: String,
    },

    /// A sample value or timestamp could not be interpreted.
    #[snafu(display("Invalid sample in series {series}: {raw}"))]
    InvalidSample {
        /// Series the sample belongs to.
        series: String,
        /// Raw text of the offending sample.
        raw: String,
    },

    /// The query would return more points than the store allows.
    #[snafu(display("Query would return {requested} points per series (limit {limit})"))]
    TooManyPoints {
        /// Points implied by the requested window.
        requested: usize,
        /// Store's per-query limit.
        limit: usize,
    },

    /// A replay dump could not be read.
    #[snafu(display("Failed to read replay file {}: {source}", path.display()))]
    ReplayRead {
        /// Path of the dump.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A replay dump could not be parsed.
    #[snafu(display("Failed to parse replay data: {source}"))]
    ReplayParse {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

impl SourceError {
    /// True for transport failures and server-side overload, where the same
    /// query may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http { .. } => true,
            SourceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Capability to execute one bounded range query against a store.
///
/// Implementations must honor the inclusive `[start, end]` window at the
/// window's step. They may refuse windows above their own point cap.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Run `query` over `window`, returning one series per result.
    async fn query_range(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Series>, SourceError>;
}

#[async_trait]
impl<T: RangeSource + ?Sized> RangeSource for Arc<T> {
    async fn query_range(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Series>, SourceError> {
        (**self).query_range(query, window).await
    }
}

#[async_trait]
impl<T: RangeSource + ?Sized> RangeSource for Box<T> {
    async fn query_range(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Series>, SourceError> {
        (**self).query_range(query, window).await
    }
}
