//! End-to-end scenarios exercising the handler, cache, and resolver together
//! against a real temp-directory document root.

mod support;

use fileserved_core::cache::ContentCache;
use fileserved_core::serve::{self, ServeRequest};

fn req(url: &str) -> ServeRequest {
    ServeRequest {
        url: url.to_string(),
        range: (-1, -1),
        if_modified_since: None,
        accept_deflate: false,
        is_head: false,
    }
}

#[test]
fn plain_file_serves_full_body_with_metadata_headers() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let resp = serve::serve(&cache, &root, "index.html", &req("/hello.txt"));

    assert_eq!(resp.status, 200);
    assert_eq!(resp.headers.get("Content-Length"), Some("6"));
    assert!(resp.headers.get("Last-Modified").is_some());
    assert!(resp.headers.get("Content-Encoding").is_none());
}

#[test]
fn tiny_file_does_not_retain_a_compressed_copy_even_when_accepted() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let mut request = req("/hello.txt");
    request.accept_deflate = true;

    let resp = serve::serve(&cache, &root, "index.html", &request);
    // 6 bytes can't beat the "Content-Encoding: deflate" header's own cost.
    assert!(resp.headers.get("Content-Encoding").is_none());
    assert_eq!(resp.headers.get("Content-Length"), Some("6"));
}

#[test]
fn explicit_byte_range_on_a_large_file_yields_partial_content() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let mut request = req("/big.bin");
    request.range = (0, 99);

    let resp = serve::serve(&cache, &root, "index.html", &request);
    assert_eq!(resp.status, 206);
    assert_eq!(resp.headers.get("Content-Length"), Some("100"));
    assert_eq!(resp.headers.get("Content-Range"), Some("bytes 0-99/20000"));
}

#[test]
fn range_past_the_end_of_a_large_file_is_unsatisfiable() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let mut request = req("/big.bin");
    request.range = (30_000, -1);

    let resp = serve::serve(&cache, &root, "index.html", &request);
    assert_eq!(resp.status, 416);
    assert_eq!(resp.headers.get("Content-Range"), Some("bytes */20000"));
}

#[test]
fn root_request_serves_the_index_file() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let resp = serve::serve(&cache, &root, "index.html", &req("/"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.headers.get("Content-Type"), Some("text/html"));
}

#[test]
fn directory_without_index_renders_a_listing_excluding_dotfiles() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let resp = serve::serve(&cache, &root, "index.html", &req("/sub/"));

    assert_eq!(resp.status, 200);
    assert_eq!(resp.headers.get("Content-Type"), Some("text/html"));

    let serve::Body::InMemory { entry, .. } = &resp.body else {
        panic!("expected an in-memory directory listing body");
    };
    let fileserved_core::cache::CacheEntryKind::DirectoryListing { rendered } = &entry.kind else {
        panic!("expected a DirectoryListing entry");
    };
    let html = String::from_utf8(rendered.clone()).unwrap();
    assert!(html.contains("Index of"));
    assert!(html.contains("child.txt"));
    assert!(html.contains(r#"href="..">Parent directory"#));
    assert!(!html.contains(".hidden"));
}

#[test]
fn traversal_attempt_above_the_document_root_is_not_found() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let resp = serve::serve(&cache, &root, "index.html", &req("/../../../../etc/passwd"));
    assert_eq!(resp.status, 404);
}

#[test]
fn conditional_get_with_a_future_if_modified_since_short_circuits() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    let mut request = req("/hello.txt");
    request.if_modified_since = Some(i64::MAX);

    let resp = serve::serve(&cache, &root, "index.html", &request);
    assert_eq!(resp.status, 304);
    assert!(matches!(resp.body, serve::Body::None));
}

#[test]
fn repeated_requests_for_the_same_key_reuse_the_cached_entry() {
    let (_dir, root) = support::scenario_root();
    let cache = ContentCache::new();
    assert_eq!(cache.len(), 0);

    let _ = serve::serve(&cache, &root, "index.html", &req("/hello.txt"));
    assert_eq!(cache.len(), 1);

    let _ = serve::serve(&cache, &root, "index.html", &req("/hello.txt"));
    assert_eq!(cache.len(), 1, "second request must hit the cache, not reconstruct");
}
