//! Full-text query construction and pagination helpers.
//!
//! The SQL here is assembled by template substitution of the order column and
//! direction only; every piece of user input (the search phrase, the offset, the
//! info-hash) is always bound through a parameter placeholder, never interpolated.
use std::fmt;

/// Fixed page size for the read path, as specified in §4.3.
pub const PAGE_SIZE: i64 = 15;

/// Ordering criteria for `query_torrents`. `Relevance` is only meaningful when the
/// search phrase is non-empty; callers must check this themselves (§7: an unknown or
/// inapplicable order-by is a programmer-invariant violation, not a runtime error to
/// recover from).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Relevance,
    Name,
    TotalSize,
    CreatedAt,
    NFiles,
}

impl OrderBy {
    fn column(self) -> &'static str {
        match self {
            OrderBy::Relevance => "idx.rank",
            OrderBy::Name => "name",
            OrderBy::TotalSize => "total_size",
            OrderBy::CreatedAt => "created_at",
            OrderBy::NFiles => "n_files",
        }
    }
}

/// Turns a free-form user query into an FTS5 phrase query: embedded `"` are doubled
/// and the whole string is wrapped in `"..."`. This makes every search a literal
/// substring match and neutralises FTS5's operators (`AND`, `OR`, `NOT`, `*`, `:`,
/// parentheses all lose their special meaning inside a phrase).
#[must_use]
pub fn escape_fts_phrase(query: &str) -> String {
    let escaped = query.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

/// Builds the `SELECT` used by `query_torrents`. `has_query` controls whether the
/// FTS join is present at all (an empty search phrase performs no ranking join).
#[must_use]
pub(super) fn build_select(order_by: OrderBy, ascending: bool, has_query: bool) -> String {
    let direction = if ascending { "ASC" } else { "DESC" };
    let order_column = order_by.column();

    let rank_column = if has_query { "idx.rank" } else { "0" };

    let join_clause = if has_query {
        "INNER JOIN (SELECT rowid AS id, bm25(torrents_idx) AS rank FROM torrents_idx WHERE torrents_idx MATCH ?) AS idx USING (id)"
    } else {
        ""
    };

    format!(
        "SELECT id, info_hash, name, total_size, created_at, updated_at, \
         (SELECT COUNT(*) FROM files WHERE torrents.id = files.torrent_id) AS n_files, \
         {rank_column} AS relevance \
         FROM torrents {join_clause} \
         ORDER BY {order_column} {direction}, id {direction} \
         LIMIT ? OFFSET ?;"
    )
}

/// Builds the matching `COUNT(*)` query for `query_torrents_count`.
#[must_use]
pub(super) fn build_count(has_query: bool) -> String {
    if has_query {
        "SELECT COUNT(*) FROM torrents INNER JOIN \
         (SELECT rowid AS id FROM torrents_idx WHERE torrents_idx MATCH ?) AS idx USING (id);"
            .to_string()
    } else {
        "SELECT COUNT(*) FROM torrents;".to_string()
    }
}

/// Converts a 1-indexed page number into a 0-indexed row offset.
#[must_use]
pub fn offset_for_page(page: i64) -> i64 {
    (page.max(1) - 1) * PAGE_SIZE
}

/// A page-window for rendering "1 ... 4 5 [6] 7 8 ... 20"-style pagination links.
/// `None` entries in `items` stand for an elided gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub current: i64,
    pub prev: Option<i64>,
    pub next: Option<i64>,
    pub items: Vec<Option<i64>>,
}

impl fmt::Display for Pagination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} of window {:?}", self.current, self.items)
    }
}

/// Computes a pagination window for `current` out of `max` total pages, matching the
/// original implementation's windowing algorithm: always show the first and last
/// page, a run of up to 2 pages on either side of `current`, and `None` gaps where
/// pages were elided.
#[must_use]
pub fn paginate(current: i64, max: i64) -> Pagination {
    let prev = if current != 1 { Some(current - 1) } else { None };
    let next = if current != max { Some(current + 1) } else { None };

    let mut items = vec![Some(1)];

    if current == 1 && max == 1 {
        return Pagination { current, prev, next, items };
    }

    if current > 4 {
        items.push(None);
    }

    let r = 2;
    let r1 = (current - r).max(2);
    let r2 = current + r;

    for i in r1..=r2.min(max) {
        items.push(Some(i));
    }

    if r2 + 1 < max {
        items.push(None);
    }
    if r2 < max {
        items.push(Some(max));
    }

    Pagination { current, prev, next, items }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_embedded_quotes() {
        assert_eq!(escape_fts_phrase("ubuntu \"22.04\" iso"), "\"ubuntu \"\"22.04\"\" iso\"");
    }

    #[test]
    fn leaves_fts_operators_inert_inside_the_phrase() {
        // The operators are just characters once wrapped in a phrase; this assertion
        // documents that we never attempt to special-case them.
        let phrase = escape_fts_phrase("foo AND bar OR NOT baz*():");
        assert_eq!(phrase, "\"foo AND bar OR NOT baz*():\"");
    }

    #[test]
    fn offset_for_first_page_is_zero() {
        assert_eq!(offset_for_page(1), 0);
    }

    #[test]
    fn offset_advances_by_page_size() {
        assert_eq!(offset_for_page(2), PAGE_SIZE);
        assert_eq!(offset_for_page(3), PAGE_SIZE * 2);
    }

    #[test]
    fn pagination_shape_matches_scenario() {
        let page = paginate(5, 9);
        assert_eq!(page.items, vec![Some(1), None, Some(3), Some(4), Some(5), Some(6), Some(7), None, Some(9)]);
        assert_eq!(page.prev, Some(4));
        assert_eq!(page.next, Some(6));
    }

    #[test]
    fn pagination_single_page_has_no_prev_or_next() {
        let page = paginate(1, 1);
        assert_eq!(page.items, vec![Some(1)]);
        assert_eq!(page.prev, None);
        assert_eq!(page.next, None);
    }

    #[test]
    fn pagination_first_page_has_no_prev() {
        let page = paginate(1, 100);
        assert_eq!(page.prev, None);
        assert!(page.next.is_some());
    }

    #[test]
    fn pagination_last_page_has_no_next() {
        let page = paginate(100, 100);
        assert_eq!(page.next, None);
        assert!(page.prev.is_some());
    }
}
