//! Query windows and chunk planning.
//!
//! A [`QueryWindow`] is an inclusive `[start, end]` range sampled at a fixed
//! [`Step`]. Grid points are `start + k * step` for every `k >= 0` that does
//! not pass `end`.
//!
//! Backends cap the number of points one range query may return. To cover an
//! arbitrarily long window, [`plan_chunks`] partitions it into consecutive
//! sub-windows that:
//!
//! - hold at most `max_points` grid points each,
//! - never overlap (chunk *k+1* starts exactly one step after chunk *k* ends),
//! - leave no grid point uncovered (the last chunk ends at `end`).

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use snafu::prelude::*;

use crate::step::Step;

/// Errors raised when constructing a [`QueryWindow`].
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// The window ends before it starts.
    #[snafu(display("Invalid query window: start={start}, end={end} (expect start <= end)"))]
    InvalidRange {
        /// Requested start of the window.
        start: DateTime<Utc>,
        /// Requested end of the window.
        end: DateTime<Utc>,
    },
}

/// An inclusive time range sampled at a fixed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Step,
}

impl QueryWindow {
    /// Create a window; fails if `end < start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, step: Step) -> Result<Self, WindowError> {
        ensure!(start <= end, InvalidRangeSnafu { start, end });
        Ok(QueryWindow { start, end, step })
    }

    /// First instant of the window.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Last instant of the window (inclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Nominal sampling interval.
    pub fn step(&self) -> Step {
        self.step
    }

    /// `end - start`.
    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// True when `start == end`.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of whole steps that fit between `start` and `end`.
    pub fn step_count(&self) -> i64 {
        self.span().num_seconds() / self.step.as_secs()
    }

    /// Number of grid points in the window (`step_count() + 1`).
    pub fn point_count(&self) -> usize {
        usize::try_from(self.step_count()).map_or(0, |n| n.saturating_add(1))
    }
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] step {}",
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            self.step
        )
    }
}

/// One backend-sized piece of a larger window, tagged with its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based chronological position of this chunk.
    pub index: usize,
    /// The sub-window to query.
    pub window: QueryWindow,
}

/// Partition `window` into chunks of at most `max_points` grid points.
///
/// An empty window (`start == end`) produces no chunks. A window with fewer
/// than `max_points` steps is returned whole as a single chunk. `max_points`
/// values below 1 are treated as 1.
pub fn plan_chunks(window: &QueryWindow, max_points: usize) -> Vec<Chunk> {
    if window.is_empty() {
        return Vec::new();
    }

    let max_points = i64::try_from(max_points.max(1)).unwrap_or(i64::MAX);
    if window.step_count() < max_points {
        return vec![Chunk {
            index: 0,
            window: *window,
        }];
    }

    let step = window.step.as_duration();
    let chunk_span = Duration::seconds(window.step.as_secs().saturating_mul(max_points - 1));

    let mut chunks = Vec::new();
    let mut chunk_start = window.start;
    while chunk_start <= window.end {
        let chunk_end = (chunk_start + chunk_span).min(window.end);
        chunks.push(Chunk {
            index: chunks.len(),
            window: QueryWindow {
                start: chunk_start,
                end: chunk_end,
                step: window.step,
            },
        });
        chunk_start = chunk_end + step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn window(start: i64, end: i64, step: i64) -> QueryWindow {
        QueryWindow::new(ts(start), ts(end), Step::from_secs(step).unwrap()).unwrap()
    }

    #[test]
    fn rejects_inverted_window() {
        let err = QueryWindow::new(ts(10), ts(5), Step::from_secs(1).unwrap()).unwrap_err();
        assert!(matches!(err, WindowError::InvalidRange { .. }));
    }

    #[test]
    fn counts_points_and_steps() {
        let w = window(0, 3000, 300);
        assert_eq!(w.step_count(), 10);
        assert_eq!(w.point_count(), 11);

        // Partial trailing step is not a grid point.
        let w = window(0, 3100, 300);
        assert_eq!(w.step_count(), 10);
    }

    #[test]
    fn empty_window_has_no_chunks() {
        assert!(plan_chunks(&window(100, 100, 60), 10).is_empty());
    }

    #[test]
    fn small_window_is_a_single_chunk() {
        let w = window(0, 9 * 60, 60);
        let chunks = plan_chunks(&w, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].window, w);

        // Shorter than one step.
        let w = window(0, 30, 60);
        assert_eq!(plan_chunks(&w, 10).len(), 1);
    }

    #[test]
    fn chunks_abut_without_overlap_or_gap() {
        let w = window(0, 100 * 60, 60); // 101 points
        let chunks = plan_chunks(&w, 10);

        assert_eq!(chunks.len(), 11);
        assert_eq!(chunks[0].window.start(), w.start());
        assert_eq!(chunks.last().unwrap().window.end(), w.end());

        for (i, pair) in chunks.windows(2).enumerate() {
            assert_eq!(pair[0].index, i);
            assert_eq!(pair[1].window.start(), pair[0].window.end() + Duration::seconds(60));
        }

        for chunk in &chunks {
            assert!(chunk.window.point_count() <= 10);
        }

        let total: usize = chunks.iter().map(|c| c.window.point_count()).sum();
        assert_eq!(total, w.point_count());
    }

    #[test]
    fn final_single_point_chunk_is_kept() {
        let w = window(0, 10 * 60, 60); // 11 points, cap 10
        let chunks = plan_chunks(&w, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].window.start(), ts(600));
        assert_eq!(chunks[1].window.end(), ts(600));
    }

    #[test]
    fn display_includes_bounds_and_step() {
        let rendered = window(0, 600, 300).to_string();
        assert!(rendered.contains("1970-01-01T00:00:00+00:00"));
        assert!(rendered.contains("step 5m"));
    }
}
