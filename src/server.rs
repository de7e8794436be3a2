//! `FileServer`: the server-wide data shared by every per-thread event loop (§3).

use std::net::TcpListener;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, instrument};

use crate::cache::ContentCache;
use crate::config::ServerConfig;
use crate::event_loop::EventLoop;
use crate::fd::RootDir;

/// Server-wide state: the document root fd, configuration, and the shared
/// content cache. One instance is shared (read-only, behind `Arc`) across
/// every worker thread; nothing here is mutated on the request-serving path.
pub struct FileServer {
    root: Arc<RootDir>,
    cache: Arc<ContentCache>,
    config: ServerConfig,
}

impl FileServer {
    /// Opens the document root and builds an empty content cache.
    ///
    /// # Errors
    ///
    /// Returns the underlying `nix::Error` if the document root can't be
    /// opened as a directory.
    pub fn new(config: ServerConfig) -> Result<Self, nix::Error> {
        let root = RootDir::open(&config.root_path)?;
        Ok(Self {
            root: Arc::new(root),
            cache: Arc::new(ContentCache::new()),
            config,
        })
    }

    /// Binds `addr` with `SO_REUSEPORT`-style duplication across
    /// `config.worker_threads` listeners, one per event-loop thread, and
    /// blocks serving until `shutdown` is set.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the address can't be bound on every thread, or
    /// the underlying `nix::Error` if any thread's epoll instance can't be
    /// created.
    #[instrument(skip(self, shutdown), fields(root = %self.config.root_path.display(), threads = self.config.worker_threads))]
    pub fn run(&self, addr: std::net::SocketAddr, shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
        info!("starting file server");
        let mut handles = Vec::with_capacity(self.config.worker_threads);
        let mut epoll_fds = Vec::with_capacity(self.config.worker_threads);

        for worker in 0..self.config.worker_threads {
            let listener = bind_reuseport(addr)?;
            let root = Arc::clone(&self.root);
            let cache = Arc::clone(&self.cache);
            let config = self.config.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            // The epoll instance is built here, before the worker thread
            // starts, so its raw fd can be handed to the shutdown watcher
            // below (§4.1's termination contract: closing the fd from
            // outside is what wakes a loop blocked indefinitely on an empty
            // death queue).
            let mut event_loop =
                EventLoop::new(listener, root, cache, config).map_err(std::io::Error::from)?;
            epoll_fds.push(event_loop.epoll_raw_fd());

            let handle = std::thread::Builder::new()
                .name(format!("fileserved-worker-{worker}"))
                .spawn(move || event_loop.run(&shutdown_flag))?;
            handles.push(handle);
        }

        let watcher = spawn_shutdown_watcher(epoll_fds, Arc::clone(&shutdown))?;

        for handle in handles {
            let _ = handle.join();
        }
        let _ = watcher.join();
        Ok(())
    }

    /// Number of keys currently indexed in the shared content cache.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Spawns the thread that turns a flagged `shutdown` into something each
/// worker's blocked `epoll_wait` actually observes (§4.1's termination
/// contract). Polls the same way [`crate`]'s own signal handoff does, rather
/// than waking on a condvar, to keep the shutdown path as dependency-free as
/// the handler that sets the flag.
fn spawn_shutdown_watcher(
    epoll_fds: Vec<RawFd>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("fileserved-shutdown".to_string())
        .spawn(move || {
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    for fd in &epoll_fds {
                        // SAFETY: each fd is an `Epoll` instance's
                        // descriptor, owned by a `ManuallyDrop<Epoll>` in its
                        // worker's `EventLoop` specifically so that struct's
                        // drop glue never closes it itself — this call is
                        // the fd's one and only close.
                        let _ = nix::unistd::close(*fd);
                    }
                    return;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        })
}

/// Binds one listener per worker thread, all on the same port, via
/// `SO_REUSEPORT` — the kernel load-balances accepted connections across
/// them, which is what lets each event loop own its own listener without
/// a shared accept-queue lock.
fn bind_reuseport(addr: std::net::SocketAddr) -> std::io::Result<TcpListener> {
    use nix::sys::socket::{
        AddressFamily, SockFlag, SockType, SockaddrIn, SockaddrIn6, bind, listen, setsockopt,
        socket, sockopt,
    };
    use std::os::fd::{AsRawFd, OwnedFd};

    let family = if addr.is_ipv6() {
        AddressFamily::Inet6
    } else {
        AddressFamily::Inet
    };
    let fd: OwnedFd = socket(family, SockType::Stream, SockFlag::SOCK_CLOEXEC, None)
        .map_err(std::io::Error::from)?;
    setsockopt(&fd, sockopt::ReusePort, &true).map_err(std::io::Error::from)?;
    setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(std::io::Error::from)?;

    match addr {
        std::net::SocketAddr::V4(v4) => bind(fd.as_raw_fd(), &SockaddrIn::from(v4)),
        std::net::SocketAddr::V6(v6) => bind(fd.as_raw_fd(), &SockaddrIn6::from(v6)),
    }
    .map_err(std::io::Error::from)?;

    listen(&fd, nix::sys::socket::Backlog::new(1024).unwrap_or(nix::sys::socket::Backlog::MAXCONN))
        .map_err(std::io::Error::from)?;

    Ok(TcpListener::from(fd))
}
