//! File-Serving Handler orchestration (§4.6): resolve → cache → conditional
//! and range logic → response assembly.

use std::sync::Arc;

use tracing::instrument;

use crate::cache::{CacheEntry, CacheEntryKind, ContentCache};
use crate::error::ServeError;
use crate::fd::RootDir;
use crate::resolver::{self, Resolved};

use super::{Body, HeaderSet, Response, ServeRequest, headers, listing, range};

/// Serves one request end to end (§4.6).
#[instrument(skip(cache, root, req), fields(url = %req.url))]
pub fn serve(cache: &ContentCache, root: &RootDir, index_html: &str, req: &ServeRequest) -> Response {
    let key = resolver::strip_leading_slashes(&req.url).trim_end_matches('/');

    let resolved = match resolver::resolve_fast(root, key, index_html) {
        Ok(resolved) => resolved,
        Err(fast_err) => {
            if key.contains("/../") {
                match resolver::resolve(root, key, index_html) {
                    Ok(resolved) => resolved,
                    Err(slow_err) => return error_response(&slow_err),
                }
            } else {
                return error_response(&fast_err);
            }
        }
    };

    match resolved {
        Resolved::File { relative_path } => serve_resource(cache, root, key, &relative_path, false, req),
        Resolved::Directory { relative_path } => {
            serve_resource(cache, root, key, &relative_path, true, req)
        }
    }
}

fn serve_resource(
    cache: &ContentCache,
    root: &RootDir,
    key: &str,
    relative_path: &str,
    is_directory_listing_target: bool,
    req: &ServeRequest,
) -> Response {
    let entry = cache.coro_get_and_ref(
        key,
        || {
            CacheEntry::construct(
                root,
                key,
                relative_path,
                is_directory_listing_target,
                mime_hint,
                listing::render,
            )
        },
        || {
            if is_directory_listing_target {
                // Another task is rendering the same listing; a floating
                // zero-copy fallback makes no sense for rendered HTML, so
                // the caller just gets a 503 and retries on a later request.
                Err(ServeError::overloaded("directory listing under construction"))
            } else {
                CacheEntry::construct_floating_zero_copy(root, key, relative_path, mime_hint)
            }
        },
    );

    let entry = match entry {
        Ok(entry) => entry,
        Err(e) => return error_response(&e),
    };

    build_response(&entry, req)
}

fn build_response(entry: &Arc<CacheEntry>, req: &ServeRequest) -> Response {
    if range::is_not_modified(req.if_modified_since, entry.last_modified.1) {
        let mut headers = HeaderSet::new();
        headers.push("Last-Modified", entry.last_modified.0.clone());
        return Response {
            status: 304,
            headers,
            body: Body::None,
        };
    }

    let resolved_range = match range::resolve(req.range.0, req.range.1, entry.size, &entry.key) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    let mut headers = HeaderSet::new();
    headers.push("Last-Modified", entry.last_modified.0.clone());
    let now = now_epoch();
    headers.push("Date", headers::format_rfc_date(now));
    headers.push(
        "Expires",
        headers::format_rfc_date(now + crate::config::DEFAULT_KEEP_ALIVE_SECS as i64),
    );
    headers.push("Content-Type", entry.mime_type.clone());
    headers.push("Accept-Ranges", "bytes");

    let status = if resolved_range.is_partial { 206 } else { 200 };
    if resolved_range.is_partial {
        headers.push(
            "Content-Range",
            format!(
                "bytes {}-{}/{}",
                resolved_range.start,
                resolved_range.start + resolved_range.length - 1,
                entry.size
            ),
        );
    }

    // Compression only applies to a full-body response: compressed byte
    // offsets don't correspond to uncompressed ones, so a partial range
    // always serves from the uncompressed copy.
    let use_compressed = !resolved_range.is_partial
        && req.accept_deflate
        && matches!(&entry.kind, CacheEntryKind::InMemory { compressed: Some(_), .. });

    let body = match &entry.kind {
        CacheEntryKind::InMemory { compressed, .. } if use_compressed => {
            let len = compressed.as_ref().map_or(0, Vec::len) as u64;
            headers.push("Content-Encoding", "deflate");
            headers.push("Content-Length", len.to_string());
            Body::InMemory {
                entry: Arc::clone(entry),
                compressed: true,
                start: 0,
                length: len,
            }
        }
        CacheEntryKind::InMemory { .. } | CacheEntryKind::DirectoryListing { .. } => {
            headers.push("Content-Length", resolved_range.length.to_string());
            Body::InMemory {
                entry: Arc::clone(entry),
                compressed: false,
                start: resolved_range.start,
                length: resolved_range.length,
            }
        }
        CacheEntryKind::ZeroCopy { .. } => {
            headers.push("Content-Length", resolved_range.length.to_string());
            Body::File {
                entry: Arc::clone(entry),
                start: resolved_range.start,
                length: resolved_range.length,
            }
        }
    };

    // HEAD gets exactly the same headers as GET (including Content-Length
    // and Content-Encoding) but writes no body bytes (§8 HEAD/GET law).
    let body = if req.is_head { Body::None } else { body };

    Response { status, headers, body }
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn mime_hint(relative_path: &str) -> String {
    mime_guess::from_path(relative_path)
        .first_or_octet_stream()
        .to_string()
}

fn error_response(error: &ServeError) -> Response {
    let mut headers = HeaderSet::new();
    if let ServeError::RangeUnsatisfiable { size, .. } = error {
        headers.push("Content-Range", format!("bytes */{size}"));
    }
    Response {
        status: error.status_code(),
        headers,
        body: Body::None,
    }
}
