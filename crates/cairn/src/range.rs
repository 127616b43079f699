//! Inclusive byte and chunk ranges with from-the-end indices.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Inclusive `start..=end` pair. Negative values count from the end.
///
/// `(0, 0)` and `(-1, 0)` both mean "everything".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub const FULL: Self = Self { start: 0, end: 0 };

    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Index span of an already-normalized range.
    ///
    /// Normalization accepts `end == total_length`; that bound is clamped to the
    /// last valid index here, so `(n, n)` over `n` items yields an empty span.
    pub fn span(self, total_length: u64) -> RangeInclusive<u64> {
        let last = total_length.saturating_sub(1);
        (self.start.max(0) as u64)..=(self.end.max(0) as u64).min(last)
    }

    /// Whether a normalized range covers `0..total_length` entirely.
    pub fn covers(self, total_length: u64) -> bool {
        let span = self.span(total_length);
        *span.start() == 0 && *span.end() + 1 >= total_length
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// A range that cannot be satisfied against the resource length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("range {range} not satisfiable: {reason} (bound {index})")]
pub struct RangeError {
    /// The range as requested, before normalization.
    pub range: Range,
    /// The offending bound after resolution.
    pub index: i64,
    pub reason: &'static str,
}

/// Resolve a requested range against `total_length`.
///
/// The full-range special case is checked before negative indices are
/// resolved, so `(0, 0)` is never read as "the last element".
pub fn normalize_range(range: Range, total_length: u64) -> Result<Range, RangeError> {
    let total = i64::try_from(total_length).unwrap_or(i64::MAX);
    let (mut start, mut end) = (range.start, range.end);

    let fail = |index: i64, reason: &'static str| RangeError {
        range,
        index,
        reason,
    };
    let from_end = |index: i64| {
        index
            .checked_add(total - 1)
            .ok_or_else(|| fail(index, "index out of representable range"))
    };

    if start == -1 && end == 0 {
        start = 0;
    }

    if start == 0 && end == 0 {
        end = total - 1;
    } else {
        if start < 0 {
            start = from_end(start)?;
        }
        if end < 0 {
            end = from_end(end)?;
        }
    }

    if start > end {
        return Err(fail(start, "start after end"));
    }
    if start < 0 {
        return Err(fail(start, "start before beginning"));
    }
    if end > total {
        return Err(fail(end, "end past length"));
    }

    Ok(Range { start, end })
}
