//! Zero-copy file transfer and the write-backpressure suspension point
//! (§4.2's `YieldUntilWritable`, §4.8's `ZeroCopy` strategy).
//!
//! `sendfile(2)` copies bytes from a file descriptor straight into a socket
//! inside the kernel; userspace never touches the data. The listener socket
//! and every accepted connection are non-blocking, so a full send buffer
//! makes `sendfile` return `EAGAIN` instead of blocking — the only thing
//! this future does on `EAGAIN` is flag the owning task's interest as
//! `Write` and return `Pending`; the event loop re-arms the fd for
//! `EPOLLOUT` and resumes the task once the kernel says the socket is
//! writable again.

use std::future::Future;
use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

use nix::errno::Errno;
use nix::sys::sendfile::sendfile;

use crate::task::mark_wants_write;

/// Sends `length` bytes from `file_fd` starting at `start` into `socket_fd`.
pub struct SendFile {
    socket_fd: RawFd,
    file_fd: RawFd,
    offset: libc_off_t,
    remaining: u64,
}

// nix's `sendfile` takes the platform's native `off_t`; on every Linux target
// this crate builds for, that's a 64-bit signed integer.
#[allow(non_camel_case_types)]
type libc_off_t = i64;

impl SendFile {
    /// Builds a transfer of `[start, start + length)` from `file_fd` to `socket_fd`.
    #[must_use]
    pub fn new(socket_fd: RawFd, file_fd: RawFd, start: u64, length: u64) -> Self {
        Self {
            socket_fd,
            file_fd,
            offset: start as libc_off_t,
            remaining: length,
        }
    }
}

impl Future for SendFile {
    type Output = std::io::Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // SAFETY: both fds are owned elsewhere (the connection's `TcpStream`
        // in the event loop's connection table, the per-serve file fd in the
        // caller's `OwnedFd`) and outlive this poll call.
        let out_fd: BorrowedFd<'_> = unsafe { BorrowedFd::borrow_raw(this.socket_fd) };
        let in_fd: BorrowedFd<'_> = unsafe { BorrowedFd::borrow_raw(this.file_fd) };

        while this.remaining > 0 {
            let want = this.remaining.min(i32::MAX as u64) as usize;
            match sendfile(out_fd, in_fd, Some(&mut this.offset), want) {
                Ok(0) => return Poll::Ready(Ok(())),
                Ok(sent) => this.remaining -= sent as u64,
                Err(Errno::EAGAIN) => {
                    mark_wants_write();
                    return Poll::Pending;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Poll::Ready(Err(std::io::Error::from(e))),
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Writes an owned buffer to a raw socket fd, non-blocking, yielding via the
/// same `Write`-interest signal as [`SendFile`] on backpressure. Used for
/// response head bytes and in-memory bodies, which have no file fd to
/// `sendfile` from but still must not block the event-loop thread.
pub struct WriteBuf {
    fd: RawFd,
    data: Vec<u8>,
    written: usize,
}

impl WriteBuf {
    /// Queues `data` for a non-blocking write to `fd`.
    #[must_use]
    pub fn new(fd: RawFd, data: Vec<u8>) -> Self {
        Self { fd, data, written: 0 }
    }
}

impl Future for WriteBuf {
    type Output = std::io::Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // SAFETY: the fd is owned by the event loop's connection table for
        // the lifetime of the task driving this future.
        let fd = unsafe { BorrowedFd::borrow_raw(this.fd) };

        while this.written < this.data.len() {
            match nix::unistd::write(fd.as_fd(), &this.data[this.written..]) {
                Ok(0) => {
                    return Poll::Ready(Err(std::io::Error::from(std::io::ErrorKind::WriteZero)));
                }
                Ok(n) => this.written += n,
                Err(Errno::EAGAIN) => {
                    mark_wants_write();
                    return Poll::Pending;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Poll::Ready(Err(std::io::Error::from(e))),
            }
        }
        Poll::Ready(Ok(()))
    }
}
