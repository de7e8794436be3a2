//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use fileserved_core::{DEFAULT_INDEX_HTML, DEFAULT_KEEP_ALIVE_SECS};

/// Serve a directory tree over HTTP.
///
/// fileserved runs one readiness-driven event-loop thread per worker, each
/// serving from a shared, non-blocking content cache.
#[derive(Parser, Debug)]
#[command(name = "fileserved")]
#[command(author, version, about)]
pub struct Args {
    /// Directory to serve as the document root.
    pub root: PathBuf,

    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    pub listen: std::net::SocketAddr,

    /// Filename served when a directory is requested and contains one.
    #[arg(long, default_value = DEFAULT_INDEX_HTML)]
    pub index: String,

    /// Idle keep-alive timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_KEEP_ALIVE_SECS)]
    pub keep_alive: u64,

    /// Worker threads (event loops). Defaults to the number of CPUs.
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Increase output verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_root_argument() {
        let args = Args::try_parse_from(["fileserved", "/srv/www"]).unwrap();
        assert_eq!(args.root, PathBuf::from("/srv/www"));
        assert_eq!(args.listen, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(args.index, "index.html");
        assert_eq!(args.keep_alive, 5);
        assert!(args.threads.is_none());
    }

    #[test]
    fn overrides_apply() {
        let args = Args::try_parse_from([
            "fileserved",
            "/srv/www",
            "--listen",
            "0.0.0.0:9000",
            "--index",
            "home.html",
            "--keep-alive",
            "30",
            "-j",
            "4",
        ])
        .unwrap();
        assert_eq!(args.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(args.index, "home.html");
        assert_eq!(args.keep_alive, 30);
        assert_eq!(args.threads, Some(4));
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = Args::try_parse_from(["fileserved"]);
        assert!(result.is_err());
    }
}
