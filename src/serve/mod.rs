//! File-Serving Handler (§4.6): orchestrates resolution, the content cache,
//! conditional/range logic, and response assembly.

pub mod handler;
pub mod headers;
pub mod listing;
pub mod range;

pub use headers::HeaderSet;
pub use handler::serve;

use std::sync::Arc;

use crate::cache::CacheEntry;

/// The subset of an inbound request the handler needs; decoupled from the
/// event loop's dense per-fd [`crate::request::RequestSlot`] so this module
/// stays testable without a live socket.
#[derive(Debug, Clone)]
pub struct ServeRequest {
    /// Request path with the leading `/` already present, e.g. `/sub/file.txt`.
    pub url: String,
    /// Parsed `Range` bounds, `-1` when the header was absent (§4.7).
    pub range: (i64, i64),
    /// Parsed `If-Modified-Since`, as epoch seconds, if the header was present.
    pub if_modified_since: Option<i64>,
    /// Whether the client's `Accept-Encoding` allows a `deflate` body.
    pub accept_deflate: bool,
    /// `true` for a `HEAD` request: headers are computed exactly as for `GET`
    /// but no body bytes are written (§4.6, §8's HEAD/GET header-parity law).
    pub is_head: bool,
}

/// A fully assembled response, ready for the out-of-scope wire writer.
#[derive(Debug)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, in the order they should be written.
    pub headers: HeaderSet,
    /// What to send as the body.
    pub body: Body,
}

/// Body descriptor: either bytes already resident in the cache entry, or a
/// zero-copy file region to be sent via the out-of-scope transfer primitive.
#[derive(Debug)]
pub enum Body {
    /// No body (e.g. `304 Not Modified`).
    None,
    /// A byte range within an in-memory (optionally compressed) entry.
    InMemory {
        /// The entry backing this response; keeps the bytes alive.
        entry: Arc<CacheEntry>,
        /// Whether to send the compressed copy.
        compressed: bool,
        /// First byte to send, inclusive.
        start: u64,
        /// Number of bytes to send.
        length: u64,
    },
    /// A byte range within a file to be read and sent via zero-copy transfer.
    File {
        /// The entry backing this response; carries the relative path.
        entry: Arc<CacheEntry>,
        /// First byte to send, inclusive.
        start: u64,
        /// Number of bytes to send.
        length: u64,
    },
}
