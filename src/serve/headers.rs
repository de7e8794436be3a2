//! RFC 7231 date formatting and response header assembly.
//!
//! Date formatting itself is an external collaborator's contract (§1): this
//! module just calls through to [`httpdate`] rather than reimplementing
//! `asctime`-flavored date math.

use std::time::{Duration, UNIX_EPOCH};

/// Formats `epoch_secs` as an RFC 7231 `HTTP-date`
/// (`Sun, 06 Nov 1994 08:49:37 GMT`), used for `Last-Modified`, `Date`, and
/// `Expires`.
#[must_use]
pub fn format_rfc_date(epoch_secs: i64) -> String {
    let secs = epoch_secs.max(0) as u64;
    let when = UNIX_EPOCH + Duration::from_secs(secs);
    httpdate::fmt_http_date(when)
}

/// A response header set, built incrementally by the handler (§4.6) and
/// serialized by the out-of-scope wire writer.
#[derive(Debug, Default, Clone)]
pub struct HeaderSet {
    pairs: Vec<(String, String)>,
}

impl HeaderSet {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, preserving insertion order.
    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.pairs.push((name.to_string(), value.into()));
    }

    /// Iterates headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Looks up the first value for `name`, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_unix_epoch() {
        assert_eq!(format_rfc_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }

    #[test]
    fn negative_epoch_clamps_to_zero() {
        assert_eq!(format_rfc_date(-5), format_rfc_date(0));
    }

    #[test]
    fn header_set_preserves_order_and_is_case_insensitive_on_lookup() {
        let mut headers = HeaderSet::new();
        headers.push("Content-Length", "6");
        headers.push("Last-Modified", "Thu, 01 Jan 1970 00:00:00 GMT");

        let names: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Content-Length", "Last-Modified"]);
        assert_eq!(headers.get("content-length"), Some("6"));
    }
}
