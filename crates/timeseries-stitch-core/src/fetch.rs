//! Range fetching over arbitrarily large windows.
//!
//! [`RangeFetcher`] runs one query against a [`RangeSource`](crate::source::RangeSource)
//! and aligns the returned series into a table. [`ChunkedRangeFetcher`]
//! splits windows that exceed the store's per-query point cap into abutting
//! chunks, fetches them (optionally with bounded concurrency) and stitches
//! the per-chunk tables back together in chronological order.

pub mod chunked;
pub mod error;
pub mod range;

pub use chunked::{ChunkedRangeFetcher, DEFAULT_CONCURRENCY, DEFAULT_MAX_POINTS};
pub use error::FetchError;
pub use range::RangeFetcher;
