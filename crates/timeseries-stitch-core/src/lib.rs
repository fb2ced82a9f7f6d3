//! Historical time-series retrieval, stitching and quality segmentation.
//!
//! This crate provides the building blocks of `timeseries-stitch`:
//!
//! - Store clients behind the async `RangeSource` trait, including a
//!   Prometheus `query_range` client and an in-memory replay store
//!   (`source` module).
//! - Chunk planning that splits long windows under the store's per-query
//!   point cap (`window` module) and fetchers that run the chunks and stitch
//!   the results back together in order (`fetch` module).
//! - A deterministic nearest-timestamp merger that aligns independently
//!   sampled series into one `Table`, renaming colliding columns to
//!   `name_(i)` (`merge` and `table` modules).
//! - Dataset assembly onto a uniform grid with cyclical time and solar
//!   position features (`dataset` module).
//! - Quality segmentation into contiguous, gap-free stretches with saturated
//!   readings masked (`segment` module).
//!
//! A typical pipeline is driven by a `PipelineConfig` (`config` module):
//! build a chunked fetcher over a source, assemble the dataset for a range
//! with `DatasetBuilder`, then hand it to `QualitySegmenter`.
#![deny(missing_docs)]
pub mod config;
pub mod dataset;
pub mod fetch;
pub mod merge;
pub mod segment;
pub mod series;
pub mod source;
pub mod step;
pub mod table;
pub mod window;

pub use config::PipelineConfig;
pub use dataset::{DatasetBuilder, DatasetConfig};
pub use fetch::{ChunkedRangeFetcher, FetchError, RangeFetcher};
pub use merge::SeriesMerger;
pub use segment::{QualitySegmenter, Segment, SegmenterConfig};
pub use series::{Sample, Series};
pub use source::{PrometheusSource, RangeSource, ReplaySource};
pub use step::Step;
pub use table::Table;
pub use window::{QueryWindow, plan_chunks};
