//! Server-wide configuration inputs (§6).
//!
//! [`ServerConfig`] is the contract boundary between this crate and whatever
//! owns configuration loading (out of scope here, per §1). The demo binary
//! builds one from a `clap`-derived CLI struct; embedders build one directly.

use std::path::PathBuf;

/// Default keep-alive timeout, also reused as the content cache's retention
/// hint (spec.md §6/§9 note "capacity/retention hint 5").
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 5;

/// Default index filename appended when a directory is requested.
pub const DEFAULT_INDEX_HTML: &str = "index.html";

/// Configuration accepted by [`crate::server::FileServer::new`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Absolute filesystem path to the document root.
    pub root_path: PathBuf,
    /// Filename served when a directory is requested and it exists (default `"index.html"`).
    pub index_html: String,
    /// Idle keep-alive timeout, in seconds, enforced by the death queue.
    pub keep_alive_timeout_secs: u64,
    /// Number of OS threads, each running its own event loop.
    pub worker_threads: usize,
    /// Death-queue ring capacity per thread (max concurrent fds per thread).
    pub max_connections_per_thread: usize,
}

impl ServerConfig {
    /// Builds a config with the crate's defaults for everything but the
    /// document root.
    #[must_use]
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            index_html: DEFAULT_INDEX_HTML.to_string(),
            keep_alive_timeout_secs: DEFAULT_KEEP_ALIVE_SECS,
            worker_threads: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            max_connections_per_thread: 4096,
        }
    }

    /// Overrides the index filename.
    #[must_use]
    pub fn with_index_html(mut self, index_html: impl Into<String>) -> Self {
        self.index_html = index_html.into();
        self
    }

    /// Overrides the keep-alive timeout.
    #[must_use]
    pub fn with_keep_alive_timeout_secs(mut self, secs: u64) -> Self {
        self.keep_alive_timeout_secs = secs;
        self
    }

    /// Overrides the worker thread count.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ServerConfig::new("/srv/www");
        assert_eq!(cfg.index_html, "index.html");
        assert_eq!(cfg.keep_alive_timeout_secs, 5);
        assert!(cfg.worker_threads >= 1);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = ServerConfig::new("/srv/www")
            .with_index_html("home.html")
            .with_keep_alive_timeout_secs(30)
            .with_worker_threads(0);
        assert_eq!(cfg.index_html, "home.html");
        assert_eq!(cfg.keep_alive_timeout_secs, 30);
        assert_eq!(cfg.worker_threads, 1);
    }
}
