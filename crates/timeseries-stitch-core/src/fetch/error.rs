//! Error types for the fetch layer.
//!
//! Every variant carries the [`QueryWindow`] it failed on so callers can retry
//! exactly that window instead of the whole request.

use std::time::Duration;

use snafu::prelude::*;

use crate::{merge::MergeError, source::SourceError, window::QueryWindow};

/// Errors from [`RangeFetcher`](super::RangeFetcher) and
/// [`ChunkedRangeFetcher`](super::ChunkedRangeFetcher).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    /// The store could not execute the query for this window.
    #[snafu(display("Backend unavailable for window {window}: {source}"))]
    BackendUnavailable {
        /// Window whose query failed.
        window: QueryWindow,
        /// Underlying store error.
        source: SourceError,
    },

    /// The query for this window did not complete in time.
    #[snafu(display("Query for window {window} timed out after {timeout:?}"))]
    ChunkTimeout {
        /// Window whose query timed out.
        window: QueryWindow,
        /// Configured per-query timeout.
        timeout: Duration,
    },

    /// The store returned series that cannot be merged.
    #[snafu(display("Malformed series for window {window}: {source}"))]
    MalformedSeries {
        /// Window whose result was malformed.
        window: QueryWindow,
        /// Underlying merge error.
        source: MergeError,
    },
}

impl FetchError {
    /// The window to retry.
    pub fn window(&self) -> &QueryWindow {
        match self {
            FetchError::BackendUnavailable { window, .. }
            | FetchError::ChunkTimeout { window, .. }
            | FetchError::MalformedSeries { window, .. } => window,
        }
    }

    /// True for transient failures where retrying the same window may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::BackendUnavailable { source, .. } => source.is_transient(),
            FetchError::ChunkTimeout { .. } => true,
            FetchError::MalformedSeries { .. } => false,
        }
    }
}
