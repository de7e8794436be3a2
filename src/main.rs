//! CLI entry point for the fileserved demo binary.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::Parser;
use fileserved_core::{FileServer, ServerConfig};
use tracing::info;

mod cli;

use cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ServerConfig::new(&args.root)
        .with_index_html(args.index)
        .with_keep_alive_timeout_secs(args.keep_alive);
    if let Some(threads) = args.threads {
        config = config.with_worker_threads(threads);
    }

    info!(root = %args.root.display(), listen = %args.listen, "fileserved starting");

    let server = FileServer::new(config)
        .with_context(|| format!("opening document root {}", args.root.display()))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc_shutdown(shutdown);
    }

    server
        .run(args.listen, shutdown)
        .with_context(|| format!("serving on {}", args.listen))
}

/// Flags `shutdown` on the first `SIGINT`/`SIGTERM`. `FileServer::run` turns
/// the flag into something each worker's blocked `epoll_wait` actually
/// observes by closing its epoll fd from outside (§4.1).
fn ctrlc_shutdown(shutdown: Arc<AtomicBool>) {
    use nix::sys::signal::{SigHandler, Signal, signal};
    use std::sync::atomic::{AtomicBool as StdAtomicBool, Ordering};

    static REQUESTED: StdAtomicBool = StdAtomicBool::new(false);

    extern "C" fn handle(_: i32) {
        REQUESTED.store(true, Ordering::SeqCst);
    }

    // SAFETY: `handle` only stores to a static atomic, which is async-signal-safe.
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::Handler(handle));
        let _ = signal(Signal::SIGTERM, SigHandler::Handler(handle));
    }

    std::thread::spawn(move || {
        loop {
            if REQUESTED.load(Ordering::SeqCst) {
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    });
}
