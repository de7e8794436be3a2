//! Range & Conditional Logic (§4.7).
//!
//! The request's `If-Modified-Since`/`Range` headers are assumed already
//! parsed into epoch seconds / `(from, to)` pairs by the out-of-scope HTTP
//! request parser (§1); this module only implements the decision rules over
//! those already-parsed values.

use crate::error::ServeError;

/// A byte range resolved against a resource's total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    /// First byte to send, inclusive.
    pub start: u64,
    /// Number of bytes to send.
    pub length: u64,
    /// Whether the client supplied an explicit `Range` header — selects
    /// `206 Partial Content` + `Content-Range` versus a plain `200 OK`.
    pub is_partial: bool,
}

/// Resolves a request's `(from, to)` range (each `-1` when absent) against
/// `size`, per §4.7.
///
/// # Errors
///
/// Returns [`ServeError::RangeUnsatisfiable`] per the rules in §4.7.
pub fn resolve(from: i64, to: i64, size: u64, key: &str) -> Result<ResolvedRange, ServeError> {
    if from == -1 && to == -1 {
        return Ok(ResolvedRange {
            start: 0,
            length: size,
            is_partial: false,
        });
    }

    let unsatisfiable = || {
        ServeError::range_unsatisfiable(key, size, format!("bytes={from}-{}", display_to(to)))
    };

    if from < 0 || from as u64 >= size {
        return Err(unsatisfiable());
    }
    if to >= 0 && to as u64 >= size {
        return Err(unsatisfiable());
    }
    if to >= 0 && to < from {
        return Err(unsatisfiable());
    }

    let length: i64 = if to < 0 {
        size as i64 - from
    } else {
        to - from + 1
    };

    if length <= 0 {
        return Err(unsatisfiable());
    }

    Ok(ResolvedRange {
        start: from as u64,
        length: length as u64,
        is_partial: true,
    })
}

fn display_to(to: i64) -> String {
    if to < 0 { String::new() } else { to.to_string() }
}

/// Decides whether a conditional `If-Modified-Since` request should short-
/// circuit to `304 Not Modified` (§4.7): the header value is present and
/// `>=` the entry's last-modified epoch.
#[must_use]
pub fn is_not_modified(if_modified_since: Option<i64>, last_modified_epoch: i64) -> bool {
    matches!(if_modified_since, Some(ims) if ims >= last_modified_epoch)
}
