//! Byte ranges inside a single query option value.
//!
//! Option values are one line long, so diagnostics only need a column.

use std::ops::Range;

/// Half-open byte range `[start, end)` in an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    pub fn merge(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Empty span just past the last byte, where "unexpected end" points.
    pub fn eof(source: &str) -> Span {
        Span::new(source.len(), source.len())
    }
}

// logos reports token positions as ranges
impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

/// A parsed fragment and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

/// 1-based character column of a byte offset.
pub fn offset_to_column(source: &str, offset: usize) -> usize {
    source.char_indices().take_while(|(i, _)| *i < offset).count() + 1
}
