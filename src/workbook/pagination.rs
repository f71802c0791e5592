//! Cursor-based pagination shared by search and preview.
//!
//! A cursor is the decimal text of a row offset into the row universe being
//! paged. Pages are produced by scanning rows in storage order from that
//! offset and collecting the ones a predicate accepts.
//!
//! - A missing or blank cursor starts at offset 0.
//! - A cursor that is not a non-negative integer is past the end of the
//!   data: it yields an empty page rather than an error.
//! - `next_cursor` is the offset just after the last collected row, and is
//!   present exactly when `has_more` is true. Under a predicate it counts
//!   the rejected rows scanned on the way, so it can exceed
//!   `offset + rows.len()`.

use serde::Serialize;

/// A decoded page cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Start scanning at this row offset.
    Offset(usize),
    /// The cursor could not be decoded; the page is empty.
    PastEnd,
}

impl Cursor {
    /// Decodes an opaque cursor string.
    #[must_use]
    pub fn decode(cursor: Option<&str>) -> Self {
        match cursor.map(str::trim) {
            None | Some("") => Self::Offset(0),
            Some(text) => text.parse().map_or(Self::PastEnd, Self::Offset),
        }
    }

    /// Encodes a row offset as a cursor string.
    #[must_use]
    pub fn encode(offset: usize) -> String {
        offset.to_string()
    }

    /// The offset to report for a page read with this cursor.
    #[must_use]
    pub const fn offset(self) -> usize {
        match self {
            Self::Offset(offset) => offset,
            Self::PastEnd => 0,
        }
    }
}

/// Page size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    /// Page size when the caller does not ask for one.
    pub default_size: usize,
    /// Largest page size a caller may ask for.
    pub max_size: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 100,
        }
    }
}

impl PageLimits {
    /// Resolves a requested page size, clamping it to `[1, max_size]`.
    #[must_use]
    pub fn resolve(&self, requested: Option<i64>) -> usize {
        let max = self.max_size.max(1);
        requested.map_or_else(
            || self.default_size.clamp(1, max),
            |size| usize::try_from(size.max(1)).map_or(max, |size| size.min(max)),
        )
    }
}

/// One page of rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// The collected rows, in storage order.
    pub rows: Vec<T>,
    /// Offset the scan started at.
    pub offset: usize,
    /// Whether another accepted row exists after this page.
    pub has_more: bool,
    /// Cursor for the following page, if any.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// An empty final page.
    #[must_use]
    pub const fn empty(offset: usize) -> Self {
        Self {
            rows: Vec::new(),
            offset,
            has_more: false,
            next_cursor: None,
        }
    }

    /// Transforms every row while keeping the page position.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            rows: self.rows.into_iter().map(f).collect(),
            offset: self.offset,
            has_more: self.has_more,
            next_cursor: self.next_cursor,
        }
    }
}

/// Scans `rows` from the cursor's offset and collects up to `limit` rows
/// that `accept` returns `true` for.
///
/// Scanning stops at the first accepted row beyond the page, which only
/// sets `has_more`; that row starts the next page.
pub fn paginate<I, T, F>(rows: I, cursor: Cursor, limit: usize, mut accept: F) -> Page<T>
where
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> bool,
{
    let Cursor::Offset(offset) = cursor else {
        return Page::empty(0);
    };

    let limit = limit.max(1);
    let mut collected = Vec::with_capacity(limit.min(128));
    let mut resume_at = offset;
    let mut has_more = false;

    for (index, row) in rows.into_iter().enumerate().skip(offset) {
        if !accept(&row) {
            continue;
        }
        if collected.len() == limit {
            has_more = true;
            break;
        }
        collected.push(row);
        resume_at = index + 1;
    }

    Page {
        rows: collected,
        offset,
        has_more,
        next_cursor: has_more.then(|| Cursor::encode(resume_at)),
    }
}
