//! Chunked fetch for windows larger than the store's point cap.
//!
//! The window is planned into abutting chunks with
//! [`plan_chunks`](crate::window::plan_chunks). Chunks may be fetched
//! concurrently, but results are consumed strictly in chunk order and
//! stitching is never parallelized.
//!
//! Each series is stitched across chunks before anything is merged, so
//! collision names are assigned once over the whole window. Chunks abut
//! without overlap; a store that returns an inclusive boundary sample on
//! both sides of a chunk edge is tolerated: the later chunk's copy is
//! dropped and a warning logged.
//!
//! A single failed chunk fails the whole fetch; the error names the chunk
//! window so only that chunk needs to be retried.

use std::collections::HashMap;

use futures::{StreamExt, TryStreamExt, stream};
use log::{debug, warn};
use snafu::prelude::*;

use super::{FetchError, RangeFetcher, error::MalformedSeriesSnafu};
use crate::{
    merge::{SeriesMerger, ensure_ordered},
    series::Series,
    source::RangeSource,
    table::Table,
    window::{Chunk, QueryWindow, plan_chunks},
};

/// Default per-query point cap.
pub const DEFAULT_MAX_POINTS: usize = 20_000;

/// Default number of chunk queries in flight.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Splits large windows into backend-sized chunks and stitches the results.
#[derive(Debug, Clone)]
pub struct ChunkedRangeFetcher<S> {
    fetcher: RangeFetcher<S>,
    max_points: usize,
    concurrency: usize,
}

impl<S: RangeSource> ChunkedRangeFetcher<S> {
    /// Wrap `fetcher` with the default point cap and sequential execution.
    pub fn new(fetcher: RangeFetcher<S>) -> Self {
        ChunkedRangeFetcher {
            fetcher,
            max_points: DEFAULT_MAX_POINTS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Maximum grid points per chunk query (at least 1).
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.max(1);
        self
    }

    /// Maximum chunk queries in flight (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Configured point cap.
    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// The wrapped single-query fetcher.
    pub fn inner(&self) -> &RangeFetcher<S> {
        &self.fetcher
    }

    /// Chunks `window` would be split into.
    pub fn plan(&self, window: &QueryWindow) -> Vec<Chunk> {
        plan_chunks(window, self.max_points)
    }

    /// Fetch `query` over the whole of `window`.
    ///
    /// An empty window (`start == end`) yields an empty table without
    /// contacting the store.
    pub async fn fetch(&self, query: &str, window: &QueryWindow) -> Result<Table, FetchError> {
        let chunks = self.plan(window);
        match chunks.len() {
            0 => {
                warn!("empty window {window} for query {query:?}; returning an empty table");
                return Ok(Table::empty());
            }
            1 => return self.fetcher.fetch(query, window).await,
            n => debug!(
                "splitting {window} into {n} chunks of at most {} points ({} in flight)",
                self.max_points, self.concurrency
            ),
        }

        let parts: Vec<(Chunk, Vec<Series>)> = stream::iter(chunks)
            .map(|chunk| async move {
                let series = self.fetcher.fetch_series(query, &chunk.window).await?;
                Ok::<_, FetchError>((chunk, series))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let series = stitch(parts)?;
        if series.is_empty() {
            warn!("query {query:?} returned no samples for window {window}");
            return Ok(Table::empty());
        }
        SeriesMerger::merge_all(series).context(MalformedSeriesSnafu { window: *window })
    }
}

/// Join each series' per-chunk pieces in chunk order.
///
/// Pieces are matched by [`Series::key`] and by how often that key already
/// occurred in the same chunk, so unkeyed results sharing a name stay apart.
/// Series are listed in the order they were first returned. Samples that do
/// not advance past a series' last stitched timestamp are boundary repeats
/// and are dropped.
fn stitch(parts: Vec<(Chunk, Vec<Series>)>) -> Result<Vec<Series>, FetchError> {
    let mut stitched: Vec<Series> = Vec::new();
    let mut slots: HashMap<(String, usize), usize> = HashMap::new();

    for (chunk, pieces) in parts {
        debug!("chunk {} {} returned {} series", chunk.index, chunk.window, pieces.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for piece in pieces {
            ensure_ordered(&piece).context(MalformedSeriesSnafu {
                window: chunk.window,
            })?;

            let key = piece.key().to_string();
            let occurrence = seen.entry(key.clone()).or_default();
            let slot = (key, *occurrence);
            *occurrence += 1;

            let idx = match slots.get(&slot).copied() {
                Some(idx) => idx,
                None => {
                    slots.insert(slot, stitched.len());
                    stitched.push(piece);
                    continue;
                }
            };

            let target = &mut stitched[idx];
            let (_, samples) = piece.into_parts();
            let skip = match target.samples().last() {
                Some(last) => samples.partition_point(|s| s.timestamp <= last.timestamp),
                None => 0,
            };
            if skip > 0 {
                warn!(
                    "chunk {} repeated {skip} boundary sample(s) of {}; keeping the earlier values",
                    chunk.index,
                    target.name()
                );
            }
            target.extend_samples(samples.into_iter().skip(skip));
        }
    }

    Ok(stitched)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::{
        series::{Sample, Series},
        source::{ReplaySource, SourceError},
        step::Step,
    };

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn minutes(n: i64) -> Step {
        Step::from_secs(n * 60).unwrap()
    }

    fn grid_series(name: &str, points: i64, step: i64) -> Series {
        Series::from_pairs(name, (0..points).map(|i| (ts(i * step), i as f64)))
    }

    /// Records every window it is asked for and answers with the grid points
    /// in `[start, end + step]`, i.e. it leaks one sample past each chunk end.
    struct LeakyBoundarySource {
        windows: Mutex<Vec<QueryWindow>>,
    }

    #[async_trait]
    impl RangeSource for LeakyBoundarySource {
        async fn query_range(
            &self,
            _query: &str,
            window: &QueryWindow,
        ) -> Result<Vec<Series>, SourceError> {
            self.windows.lock().unwrap().push(*window);
            let step = window.step().as_secs();
            let first = window.start().timestamp() / step;
            let last = window.end().timestamp() / step + 1;
            let samples = (first..=last)
                .map(|k| Sample::new(ts(k * step), (k * 10) as f64))
                .collect();
            Ok(vec![Series::new("v", samples)])
        }
    }

    /// Fails every query whose window starts at `fail_at`.
    struct FailingSource {
        inner: ReplaySource,
        fail_at: DateTime<Utc>,
    }

    #[async_trait]
    impl RangeSource for FailingSource {
        async fn query_range(
            &self,
            query: &str,
            window: &QueryWindow,
        ) -> Result<Vec<Series>, SourceError> {
            if window.start() == self.fail_at {
                return Err(SourceError::Status {
                    url: "mock".into(),
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.inner.query_range(query, window).await
        }
    }

    #[tokio::test]
    async fn empty_window_returns_empty_table_without_querying() {
        let source = LeakyBoundarySource {
            windows: Mutex::new(Vec::new()),
        };
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(source));
        let window = QueryWindow::new(ts(600), ts(600), minutes(5)).unwrap();

        let table = fetcher.fetch("q", &window).await.unwrap();

        assert!(table.is_empty());
        assert!(fetcher.inner().source().windows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_below_one_step_yields_single_sample() {
        let source = ReplaySource::new().with_series("q", grid_series("v", 10, 300));
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(source)).with_max_points(3);
        let window = QueryWindow::new(ts(0), ts(120), minutes(5)).unwrap();

        let table = fetcher.fetch("q", &window).await.unwrap();

        assert_eq!(table.timeline(), &[ts(0)]);
    }

    #[tokio::test]
    async fn chunking_is_invisible() {
        let source = ReplaySource::new()
            .with_series("q", grid_series("a", 257, 300))
            .with_series("q", grid_series("b", 257, 300));
        let window = QueryWindow::new(ts(0), ts(256 * 300), minutes(5)).unwrap();

        let whole = RangeFetcher::new(source.clone()).fetch("q", &window).await.unwrap();

        for (cap, concurrency) in [(10, 1), (10, 4), (7, 3), (256, 2)] {
            let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(
                source.clone().with_max_points(cap),
            ))
            .with_max_points(cap)
            .with_concurrency(concurrency);
            assert!(fetcher.plan(&window).len() > 1);

            let chunked = fetcher.fetch("q", &window).await.unwrap();
            assert_eq!(chunked, whole, "cap={cap} concurrency={concurrency}");
        }
    }

    #[tokio::test]
    async fn boundary_duplicates_are_dropped_keeping_earlier_chunk() {
        let source = LeakyBoundarySource {
            windows: Mutex::new(Vec::new()),
        };
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(source)).with_max_points(4);
        let window = QueryWindow::new(ts(0), ts(9 * 60), minutes(1)).unwrap();

        let table = fetcher.fetch("q", &window).await.unwrap();

        let expected: Vec<DateTime<Utc>> = (0..=10).map(|k| ts(k * 60)).collect();
        assert_eq!(table.timeline(), expected.as_slice());
        assert!(table.timeline().windows(2).all(|w| w[0] < w[1]));

        let windows = fetcher.inner().source().windows.lock().unwrap().clone();
        assert_eq!(windows.len(), 3);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].start(), pair[0].end() + Duration::minutes(1));
        }
    }

    #[tokio::test]
    async fn a_failed_chunk_fails_the_fetch_with_its_window() {
        let source = FailingSource {
            inner: ReplaySource::new().with_series("q", grid_series("v", 30, 60)),
            fail_at: ts(10 * 60),
        };
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(source))
            .with_max_points(10)
            .with_concurrency(3);
        let window = QueryWindow::new(ts(0), ts(29 * 60), minutes(1)).unwrap();

        let err = fetcher.fetch("q", &window).await.unwrap_err();

        assert!(matches!(err, FetchError::BackendUnavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.window().start(), ts(600));
        assert_eq!(err.window().end(), ts(19 * 60));
    }

    /// Answers every window with two unkeyed `v` series: `k` and `-k`.
    struct TwinSource;

    #[async_trait]
    impl RangeSource for TwinSource {
        async fn query_range(
            &self,
            _query: &str,
            window: &QueryWindow,
        ) -> Result<Vec<Series>, SourceError> {
            let step = window.step().as_secs();
            let ks: Vec<i64> =
                (window.start().timestamp() / step..=window.end().timestamp() / step).collect();
            let twin = |sign: f64| {
                Series::from_pairs("v", ks.iter().map(|k| (ts(k * step), sign * *k as f64)))
            };
            Ok(vec![twin(1.0), twin(-1.0)])
        }
    }

    #[tokio::test]
    async fn same_named_series_keep_their_columns_across_chunks() {
        // The shorter "power" series has no samples in the second chunk.
        let source = ReplaySource::new()
            .with_series(
                "q",
                Series::from_pairs("power", (0..10).map(|m| (ts(m * 60), 100.0 + m as f64))),
            )
            .with_series(
                "q",
                Series::from_pairs("power", (0..20).map(|m| (ts(m * 60), 200.0 + m as f64))),
            );
        let window = QueryWindow::new(ts(0), ts(19 * 60), minutes(1)).unwrap();

        let whole = RangeFetcher::new(source.clone()).fetch("q", &window).await.unwrap();
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(source)).with_max_points(10);
        assert_eq!(fetcher.plan(&window).len(), 2);
        let chunked = fetcher.fetch("q", &window).await.unwrap();

        assert_eq!(chunked, whole);
        let first: Vec<Option<f64>> = (0..10).map(|m| Some(100.0 + m as f64)).collect();
        let second: Vec<Option<f64>> = (0..10).map(|m| Some(200.0 + m as f64)).collect();
        assert_eq!(chunked.column("power").unwrap(), first.as_slice());
        assert_eq!(chunked.column("power_(0)").unwrap(), second.as_slice());
    }

    #[tokio::test]
    async fn unkeyed_twins_stay_apart_across_chunks() {
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(TwinSource)).with_max_points(4);
        let window = QueryWindow::new(ts(0), ts(9 * 60), minutes(1)).unwrap();

        let table = fetcher.fetch("q", &window).await.unwrap();

        assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["v", "v_(0)"]);
        assert_eq!(table.len(), 10);
        assert_eq!(table.value("v", 9), Some(9.0));
        assert_eq!(table.value("v_(0)", 9), Some(-9.0));
    }

    #[tokio::test]
    async fn unsorted_chunk_is_malformed_with_its_window() {
        let mut samples: Vec<Sample> = (0..10).map(|m| Sample::new(ts(m * 60), 1.0)).collect();
        samples.push(Sample::new(ts(15 * 60), 2.0));
        samples.push(Sample::new(ts(12 * 60), 3.0));
        let source = ReplaySource::new().with_series("q", Series::new("v", samples));
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(source)).with_max_points(10);
        let window = QueryWindow::new(ts(0), ts(19 * 60), minutes(1)).unwrap();

        let err = fetcher.fetch("q", &window).await.unwrap_err();

        assert!(matches!(err, FetchError::MalformedSeries { .. }));
        assert!(!err.is_retryable());
        assert_eq!(err.window().start(), ts(10 * 60));
    }

    #[tokio::test]
    async fn partial_chunks_just_have_fewer_rows() {
        // Samples only exist for the first 15 minutes of a 30 minute window.
        let source = ReplaySource::new().with_series("q", grid_series("v", 16, 60));
        let fetcher = ChunkedRangeFetcher::new(RangeFetcher::new(source)).with_max_points(10);
        let window = QueryWindow::new(ts(0), ts(30 * 60), minutes(1)).unwrap();

        let table = fetcher.fetch("q", &window).await.unwrap();

        assert_eq!(table.len(), 16);
        assert_eq!(table.end(), Some(ts(15 * 60)));
    }
}
