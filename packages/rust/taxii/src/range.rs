//! `Range` / `Content-Range` handling for TAXII 2.0 pagination.
//!
//! TAXII 2.0 pages object collections with item ranges:
//! requests carry `Range: items <first>-<last>` and responses answer with
//! `Content-Range: items <first>-<last>/<total>` (total may be `*`).

/// A parsed `Content-Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: usize,
    pub last: usize,
    /// Total item count, when the server reports one.
    pub total: Option<usize>,
}

/// Format the `Range` request header for `page_size` items starting at `start`.
pub fn range_header(start: usize, page_size: usize) -> String {
    let last = start + page_size.max(1) - 1;
    format!("items {start}-{last}")
}

/// Parse `items <first>-<last>/<total>`. Returns `None` for anything else.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("items")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (first, last) = span.trim().split_once('-')?;

    let total = match total.trim() {
        "*" => None,
        n => Some(n.parse().ok()?),
    };

    Some(ContentRange {
        first: first.trim().parse().ok()?,
        last: last.trim().parse().ok()?,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_range_header() {
        assert_eq!(range_header(0, 100), "items 0-99");
        assert_eq!(range_header(200, 100), "items 200-299");
        assert_eq!(range_header(5, 0), "items 5-5");
    }

    #[test]
    fn parses_content_range_with_total() {
        assert_eq!(
            parse_content_range("items 0-99/250"),
            Some(ContentRange {
                first: 0,
                last: 99,
                total: Some(250)
            })
        );
    }

    #[test]
    fn parses_content_range_with_unknown_total() {
        let range = parse_content_range("items 100-149/*").expect("parse");
        assert_eq!(range.first, 100);
        assert_eq!(range.total, None);
    }

    #[test]
    fn rejects_malformed_content_range() {
        assert_eq!(parse_content_range("bytes 0-99/250"), None);
        assert_eq!(parse_content_range("items 0-99"), None);
        assert_eq!(parse_content_range("items a-b/c"), None);
    }
}
