//! Single-query fetch.

use std::time::Duration;

use log::{debug, warn};
use snafu::prelude::*;

use super::error::{
    BackendUnavailableSnafu, ChunkTimeoutSnafu, FetchError, MalformedSeriesSnafu,
};
use crate::{
    merge::SeriesMerger, series::Series, source::RangeSource, table::Table, window::QueryWindow,
};

/// Executes one bounded query and aligns its series into a [`Table`].
///
/// The window is sent to the store as-is, including single-point windows
/// (`start == end`); callers that want "empty window, empty table" semantics
/// use [`ChunkedRangeFetcher`](super::ChunkedRangeFetcher).
#[derive(Debug, Clone)]
pub struct RangeFetcher<S> {
    source: S,
    timeout: Option<Duration>,
}

impl<S: RangeSource> RangeFetcher<S> {
    /// Fetcher without a per-query timeout.
    pub fn new(source: S) -> Self {
        RangeFetcher {
            source,
            timeout: None,
        }
    }

    /// Fail a query with [`FetchError::ChunkTimeout`] after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The underlying store client.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run `query` over `window` and return the series as the store sent them.
    pub async fn fetch_series(
        &self,
        query: &str,
        window: &QueryWindow,
    ) -> Result<Vec<Series>, FetchError> {
        let pending = self.source.query_range(query, window);
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    return ChunkTimeoutSnafu {
                        window: *window,
                        timeout,
                    }
                    .fail();
                }
            },
            None => pending.await,
        };
        let series = result.context(BackendUnavailableSnafu { window: *window })?;
        debug!(
            "query {query:?} returned {} series for window {window}",
            series.len()
        );
        Ok(series)
    }

    /// Run `query` over `window` and merge the returned series in order.
    pub async fn fetch(&self, query: &str, window: &QueryWindow) -> Result<Table, FetchError> {
        let series = self.fetch_series(query, window).await?;
        if series.is_empty() {
            warn!("query {query:?} returned no samples for window {window}");
            return Ok(Table::empty());
        }
        SeriesMerger::merge_all(series).context(MalformedSeriesSnafu { window: *window })
    }
}
