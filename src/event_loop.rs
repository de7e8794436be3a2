//! Per-thread readiness-driven event loop (§4.1).
//!
//! One `EventLoop` owns one `epoll` instance and runs on exactly one OS
//! thread; connections never migrate between threads, so nothing here takes
//! a lock on the request-serving path. Parsing the HTTP request line is
//! treated as an external collaborator by the rest of this crate (§1) — this
//! module carries a deliberately minimal implementation of it just to make
//! the crate runnable end to end as a demo binary; a production embedder is
//! expected to plug in its own wire-level reader. Response transmission,
//! including the zero-copy transfer and its backpressure suspension, is in
//! scope and runs through the task runtime (§4.2).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::mem::ManuallyDrop;
use std::net::TcpListener;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use tracing::{debug, instrument, warn};

use crate::cache::{CacheEntry, CacheEntryKind, ContentCache};
use crate::config::ServerConfig;
use crate::death_queue::DeathQueue;
use crate::fd::{self, OpenModeFlags, RootDir};
use crate::io::{SendFile, WriteBuf};
use crate::request::RequestTable;
use crate::serve::{self, Body, ServeRequest};
use crate::task::{self, Interest, Task};

const LISTENER_TOKEN: u64 = u64::MAX;

/// Owns one thread's epoll instance, request table, and death queue.
pub struct EventLoop {
    // The fd underneath this is closed from outside, by the shutdown watcher
    // spawned in `FileServer::run` (§4.1's termination contract) — wrapping
    // it in `ManuallyDrop` stops this struct's own drop glue from closing an
    // fd number the kernel may already have handed out to someone else.
    epoll: ManuallyDrop<Epoll>,
    listener: TcpListener,
    requests: RequestTable,
    death_queue: DeathQueue,
    connections: HashMap<RawFd, std::net::TcpStream>,
    root: Arc<RootDir>,
    cache: Arc<ContentCache>,
    config: ServerConfig,
    last_tick: Instant,
}

impl EventLoop {
    /// Builds an event loop around an already-bound, non-blocking listener.
    ///
    /// # Errors
    ///
    /// Returns the underlying `nix::Error` if the epoll instance can't be
    /// created or the listener can't be registered.
    pub fn new(
        listener: TcpListener,
        root: Arc<RootDir>,
        cache: Arc<ContentCache>,
        config: ServerConfig,
    ) -> Result<Self, nix::Error> {
        listener.set_nonblocking(true).map_err(|_| nix::Error::EINVAL)?;
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        epoll.add(
            &listener,
            EpollEvent::new(EpollFlags::EPOLLIN, LISTENER_TOKEN),
        )?;

        Ok(Self {
            epoll: ManuallyDrop::new(epoll),
            listener,
            requests: RequestTable::new(config.max_connections_per_thread),
            death_queue: DeathQueue::new(config.max_connections_per_thread),
            connections: HashMap::new(),
            root,
            cache,
            config,
            last_tick: Instant::now(),
        })
    }

    /// Raw fd of this loop's epoll instance, for the shutdown watcher to
    /// close from outside (§4.1's termination contract).
    #[must_use]
    pub fn epoll_raw_fd(&self) -> RawFd {
        self.epoll.as_fd().as_raw_fd()
    }

    /// Runs the loop until the epoll fd is closed from outside, or `shutdown`
    /// is observed between wakeups.
    pub fn run(&mut self, shutdown: &std::sync::atomic::AtomicBool) {
        let mut events = [EpollEvent::empty(); 256];
        while !shutdown.load(std::sync::atomic::Ordering::Relaxed) {
            let timeout = self
                .death_queue
                .epoll_timeout()
                .map_or(EpollTimeout::NONE, |ms| EpollTimeout::from(ms as u16));

            let n = match self.epoll.wait(&mut events, timeout) {
                Ok(n) => n,
                Err(nix::Error::EINTR) => continue,
                Err(nix::Error::EBADF | nix::Error::EINVAL) => {
                    // The shutdown watcher closed our epoll fd out from under
                    // us; this is the documented way to wake a loop blocked
                    // indefinitely on an empty death queue.
                    debug!("epoll fd closed, exiting event loop");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "epoll_wait failed, stopping event loop");
                    return;
                }
            };

            for event in &events[..n] {
                if event.data() == LISTENER_TOKEN {
                    self.accept_all();
                } else {
                    self.resume(event.data() as RawFd, event.events());
                }
            }

            if self.last_tick.elapsed() >= Duration::from_secs(1) {
                self.tick_death_queue();
                self.last_tick = Instant::now();
            }
        }
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.register_connection(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn register_connection(&mut self, stream: std::net::TcpStream) {
        if self.connections.len() >= self.config.max_connections_per_thread {
            // Over the per-thread bound: reject instead of letting the
            // request table and death queue grow past the capacity they
            // were sized for (§7's `Overloaded`/503, not a worker panic).
            let _ = write_overloaded(&stream);
            return;
        }

        if stream.set_nonblocking(true).is_err() {
            return;
        }
        let fd = stream.as_raw_fd();
        let flags = EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLERR | EpollFlags::EPOLLET;
        if self
            .epoll
            .add(&stream, EpollEvent::new(flags, fd as u64))
            .is_err()
        {
            return;
        }

        let slot = self.requests.slot_mut(fd);
        slot.reset();
        slot.time_to_die = self.death_queue.clock() + self.config.keep_alive_timeout_secs;
        if self.death_queue.push(fd as usize) {
            slot.in_death_queue = true;
        } else {
            // The capacity check above should make this unreachable (the
            // death queue and the request table are both sized to
            // `max_connections_per_thread`), but don't run a connection the
            // reaper doesn't know about if it ever does race.
            self.requests.slot_mut(fd).teardown();
            let _ = self.epoll.delete(&stream);
            return;
        }
        // Leaking the owned stream into the slot keeps the fd open across
        // polls; teardown (hangup or idle reap) closes it by dropping here.
        self.connections.insert(fd, stream);
    }

    #[instrument(skip(self), fields(fd))]
    fn resume(&mut self, fd: RawFd, events: EpollFlags) {
        if events.intersects(EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR) {
            self.teardown(fd);
            return;
        }

        let has_task = self
            .requests
            .get(fd)
            .is_some_and(|slot| slot.task.is_some());

        if has_task {
            // (c) A task is already in flight for this fd — this readiness
            // event is a resumption (the socket became writable again after
            // backpressure), not a new request arriving.
            self.drive_task(fd);
            return;
        }

        // (b) No task yet: read and serve a request, then lazily spawn a
        // task to carry the response out to the socket.
        let Some(mut stream) = self.connections.remove(&fd) else {
            return;
        };
        let read_result = read_request(&mut stream);
        self.connections.insert(fd, stream);

        match read_result {
            Ok(Some(req)) => {
                let response = serve::serve(&self.cache, &self.root, &self.config.index_html, &req);
                debug!(status = response.status, "serving request");
                let root = Arc::clone(&self.root);
                let task = Task::spawn(serve_connection(fd, root, response));
                self.requests.slot_mut(fd).task = Some(task);
                self.drive_task(fd);
            }
            Ok(None) => {
                // Not enough bytes yet for a full request line; keep waiting.
            }
            Err(_) => self.teardown(fd),
        }
    }

    /// (a)+(c)+(d)+(e)+(f): polls the fd's in-flight task once, cleans it up
    /// on completion, re-arms the fd for whatever interest it reports if
    /// still pending, and refreshes the keep-alive deadline either way.
    fn drive_task(&mut self, fd: RawFd) {
        let Some(task) = self.requests.slot_mut(fd).task.as_mut() else {
            return;
        };

        match task.poll() {
            Poll::Ready(()) => {
                let failed = task.failed();
                // (a) cleanup: the task is done, drop it and go back to
                // waiting for the next request line on this connection.
                self.requests.slot_mut(fd).task = None;
                if failed {
                    debug!("connection write failed");
                    self.teardown(fd);
                    return;
                }
                self.rearm_for_interest(fd, Interest::Read);
            }
            Poll::Pending => {
                let interest = task.interest();
                self.rearm_for_interest(fd, interest);
            }
        }
        self.refresh_deadline(fd);
    }

    /// (d): re-arms `fd`'s epoll registration only when the wanted interest
    /// actually changed since the last arm, per the mapping in §4.1
    /// (wants-read -> edge-triggered `EPOLLIN`, wants-write -> level-triggered
    /// `EPOLLOUT`).
    fn rearm_for_interest(&mut self, fd: RawFd, interest: Interest) {
        let wants_write = matches!(interest, Interest::Write);
        let slot = self.requests.slot_mut(fd);
        if slot.write_events == wants_write {
            return;
        }
        slot.write_events = wants_write;

        let flags = if wants_write {
            EpollFlags::EPOLLOUT | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLERR
        } else {
            EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLERR | EpollFlags::EPOLLET
        };

        if let Some(stream) = self.connections.get(&fd) {
            let _ = self
                .epoll
                .modify(stream, &mut EpollEvent::new(flags, fd as u64));
        }
    }

    /// Bumps the slot's own deadline on activity. The death queue entry
    /// itself was pushed once, in `register_connection`; it is never pushed
    /// again here, so `kill_waiting`'s sweep must read this live value at
    /// kill-time rather than a value frozen at push time.
    fn refresh_deadline(&mut self, fd: RawFd) {
        let deadline = self.death_queue.clock() + self.config.keep_alive_timeout_secs;
        self.requests.slot_mut(fd).time_to_die = deadline;
    }

    fn tick_death_queue(&mut self) {
        self.death_queue.tick();
        let requests = &self.requests;
        let epoll = &self.epoll;
        let connections = &mut self.connections;
        self.death_queue.kill_waiting(
            |slot| {
                requests
                    .get(slot as RawFd)
                    .filter(|s| s.alive)
                    .map(|s| s.time_to_die)
            },
            |slot| {
                let fd = slot as RawFd;
                if let Some(stream) = connections.remove(&fd) {
                    let _ = epoll.delete(&stream);
                }
            },
        );
        crate::fd::wake_parked_opens();

        // A task parked on the fd-bounded open helper (EMFILE/ENFILE) just
        // got woken by the sweep above; its own fd isn't necessarily
        // readiness-ready, so nothing would otherwise re-poll it until the
        // connection's socket itself becomes ready. Drive it now instead of
        // waiting on an unrelated event.
        let woken: Vec<RawFd> = self
            .connections
            .keys()
            .copied()
            .filter(|fd| {
                self.requests
                    .get(*fd)
                    .and_then(|s| s.task.as_ref())
                    .is_some_and(Task::take_woken)
            })
            .collect();
        for fd in woken {
            self.drive_task(fd);
        }
    }

    fn teardown(&mut self, fd: RawFd) {
        if let Some(stream) = self.connections.remove(&fd) {
            let _ = self.epoll.delete(&stream);
        }
        self.requests.slot_mut(fd).teardown();
    }
}

/// Writes a minimal, best-effort `503` before dropping an over-capacity
/// connection. The stream is still in blocking mode at this point (accepted
/// but not yet switched nonblocking), so this may briefly block on a slow
/// client — acceptable on the already-degraded overload path.
fn write_overloaded(stream: &std::net::TcpStream) -> std::io::Result<()> {
    let mut stream = stream.try_clone()?;
    stream.write_all(b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
}

fn read_request(stream: &mut std::net::TcpStream) -> std::io::Result<Option<ServeRequest>> {
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
        Err(e) => return Err(e),
    };

    let text = String::from_utf8_lossy(&buf[..n]);
    parse_minimal_request(&text).map(Some).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed request line")
    })
}

/// Parses just enough of an HTTP/1.1 request to build a [`ServeRequest`]:
/// the request line plus `Range`, `If-Modified-Since`, and `Accept-Encoding`.
/// Full header parsing is an external collaborator's job (§1); this is a
/// deliberately narrow stand-in so the demo binary has something to drive.
fn parse_minimal_request(text: &str) -> Option<ServeRequest> {
    let mut lines = text.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let is_head = method.eq_ignore_ascii_case("HEAD");
    let url = parts.next()?.to_string();

    let mut range = (-1i64, -1i64);
    let mut if_modified_since = None;
    let mut accept_deflate = false;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "range" => range = parse_range_header(value).unwrap_or((-1, -1)),
            "if-modified-since" => if_modified_since = httpdate::parse_http_date(value)
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
            "accept-encoding" => accept_deflate = value.contains("deflate"),
            _ => {}
        }
    }

    Some(ServeRequest {
        url,
        range,
        if_modified_since,
        accept_deflate,
        is_head,
    })
}

fn parse_range_header(value: &str) -> Option<(i64, i64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (from, to) = spec.split_once('-')?;
    let from = if from.is_empty() { -1 } else { from.parse().ok()? };
    let to = if to.is_empty() { -1 } else { to.parse().ok()? };
    Some((from, to))
}

/// The task spawned per request once its response has been computed (§4.2,
/// §4.6's "return 200 and let the framework invoke the callback"). Writes
/// the header block, then the body via whichever transmission strategy the
/// response carries — suspending at the two points the task runtime allows:
/// a full send buffer (`WriteBuf`/`SendFile`'s `EAGAIN`) or fd exhaustion
/// when reopening a zero-copy entry's file (`open_bounded_owned`'s
/// `EMFILE`/`ENFILE`).
async fn serve_connection(fd: RawFd, root: Arc<RootDir>, response: serve::Response) {
    if let Err(e) = serve_connection_inner(fd, root, response).await {
        debug!(error = %e, "connection write failed");
        task::mark_failed();
    }
}

async fn serve_connection_inner(
    fd: RawFd,
    root: Arc<RootDir>,
    response: serve::Response,
) -> std::io::Result<()> {
    let head = render_head_bytes(&response);

    match response.body {
        Body::None => WriteBuf::new(fd, head).await,
        Body::InMemory { entry, compressed, start, length } => {
            let mut bytes = head;
            let body = entry_bytes(&entry, compressed);
            let start = (start as usize).min(body.len());
            let end = (start + length as usize).min(body.len());
            bytes.extend_from_slice(&body[start..end]);
            WriteBuf::new(fd, bytes).await
        }
        Body::File { entry, start, length } => {
            WriteBuf::new(fd, head).await?;
            if let CacheEntryKind::ZeroCopy { relative_path, .. } = &entry.kind {
                let file = fd::open_bounded_owned(
                    Arc::clone(&root),
                    relative_path.clone(),
                    OpenModeFlags::new(true),
                )
                .await
                .map_err(std::io::Error::from)?;
                SendFile::new(fd, file.as_raw_fd(), start, length).await?;
            }
            Ok(())
        }
    }
}

fn render_head_bytes(response: &serve::Response) -> Vec<u8> {
    let reason = reason_phrase(response.status);
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
    for (name, value) in response.headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("Connection: keep-alive\r\n\r\n");
    head.into_bytes()
}

fn entry_bytes(entry: &CacheEntry, compressed: bool) -> &[u8] {
    match &entry.kind {
        CacheEntryKind::InMemory { uncompressed, compressed: c } => {
            if compressed {
                c.as_deref().unwrap_or(uncompressed)
            } else {
                uncompressed
            }
        }
        CacheEntryKind::DirectoryListing { rendered } => rendered,
        CacheEntryKind::ZeroCopy { .. } => &[],
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        304 => "Not Modified",
        403 => "Forbidden",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
