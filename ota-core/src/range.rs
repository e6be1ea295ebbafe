//! HTTP range planning for bounded partial downloads

/// Parsed `Content-Range: bytes start-end/total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` when the server sent `*`
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    if let Some(t) = total {
        if end >= t {
            return None;
        }
    }
    Some(ContentRange { start, end, total })
}

/// Inclusive byte span of the next request, or `None` once `offset`
/// reaches `total`.
pub fn next_range(offset: u64, total: u64, max_request_size: usize) -> Option<(u64, u64)> {
    if offset >= total || max_request_size == 0 {
        return None;
    }
    let end = (offset + max_request_size as u64 - 1).min(total - 1);
    Some((offset, end))
}

pub fn range_header_value(start: u64, end: u64) -> String {
    format!("bytes={}-{}", start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 0-4095/1048576"),
            Some(ContentRange { start: 0, end: 4095, total: Some(1_048_576) })
        );
        assert_eq!(
            parse_content_range(" bytes 4096-8191/*"),
            Some(ContentRange { start: 4096, end: 8191, total: None })
        );
        assert_eq!(parse_content_range("bytes 0-4095/1048576").unwrap().len(), 4096);
    }

    #[test]
    fn test_parse_content_range_rejects_garbage() {
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("bytes 10-5/100"), None);
        assert_eq!(parse_content_range("bytes 0-100/100"), None);
        assert_eq!(parse_content_range("bytes */100"), None);
        assert_eq!(parse_content_range("bytes a-b/c"), None);
    }

    #[test]
    fn test_next_range_walks_to_the_end() {
        let mut offset = 0;
        let mut spans = Vec::new();
        while let Some((start, end)) = next_range(offset, 10_000, 4096) {
            spans.push((start, end));
            offset = end + 1;
        }
        assert_eq!(spans, vec![(0, 4095), (4096, 8191), (8192, 9999)]);
        assert_eq!(next_range(10_000, 10_000, 4096), None);
    }

    #[test]
    fn test_range_header_value() {
        assert_eq!(range_header_value(0, 4095), "bytes=0-4095");
    }
}
