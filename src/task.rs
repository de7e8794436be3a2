//! Cooperative task runtime (§4.2).
//!
//! Not a general-purpose async runtime: there is no cross-thread scheduling
//! and no ready queue shared between threads. Each [`Task`] is a pinned boxed
//! future driven entirely by the event loop that owns its request slot; its
//! [`Waker`] does nothing but flag that slot for re-resumption on the next
//! pass. The two suspension points request-serving code is allowed to hit —
//! the fd-bounded open helper and the zero-copy transfer backpressure yield —
//! are the only things that ever construct one of these wakers.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

/// Which epoll event set a pending task is waiting on. Set by the
/// suspension primitive itself (via [`mark_wants_write`]) just before it
/// returns `Pending`, and read back by [`Task::poll`] right after polling —
/// a thread-local side channel, since the primitives have no direct way to
/// reach the event loop that owns the fd's epoll registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wants `EPOLLIN` (the default: waiting for more request bytes, or for
    /// an unrelated fd-availability retry sweep).
    Read,
    /// Wants `EPOLLOUT` (blocked on a full socket send buffer).
    Write,
}

thread_local! {
    static CURRENT_INTEREST: Cell<Interest> = const { Cell::new(Interest::Read) };
    static CURRENT_FAILED: Cell<bool> = const { Cell::new(false) };
}

/// Called by the zero-copy-transfer backpressure primitive when a write
/// would block, so the next [`Task::poll`] caller knows to re-arm the fd for
/// `EPOLLOUT` instead of `EPOLLIN`.
pub fn mark_wants_write() {
    CURRENT_INTEREST.with(|c| c.set(Interest::Write));
}

/// Called by a task body when it hits an unrecoverable I/O error, so the
/// event loop knows to tear the connection down instead of going back to
/// waiting for the next request line on it. A task's future is fixed to
/// `Output = ()` (it must drive itself to completion either way — there is
/// no caller to propagate a `Result` to), so this is the side channel that
/// carries the outcome back to [`Task::poll`]'s caller, the same way
/// [`mark_wants_write`] carries interest.
pub fn mark_failed() {
    CURRENT_FAILED.with(|c| c.set(true));
}

/// A suspended unit of request-serving work.
pub struct Task {
    future: Pin<Box<dyn Future<Output = ()>>>,
    woken: Arc<AtomicBool>,
    interest: Interest,
    failed: bool,
}

impl Task {
    /// Wraps `future` as a task, marked woken so it gets its first poll.
    pub fn spawn(future: impl Future<Output = ()> + 'static) -> Self {
        Self {
            future: Box::pin(future),
            woken: Arc::new(AtomicBool::new(true)),
            interest: Interest::Read,
            failed: false,
        }
    }

    /// Whether this task has been woken since its last poll. Consumes the
    /// flag: callers that see `true` are expected to poll immediately after.
    #[must_use]
    pub fn take_woken(&self) -> bool {
        self.woken.swap(false, Ordering::SeqCst)
    }

    /// Polls the task once, passing it a waker that just re-arms
    /// [`Self::take_woken`].
    pub fn poll(&mut self) -> Poll<()> {
        CURRENT_INTEREST.with(|c| c.set(Interest::Read));
        CURRENT_FAILED.with(|c| c.set(false));
        let waker = slot_waker(Arc::clone(&self.woken));
        let mut cx = Context::from_waker(&waker);
        let result = self.future.as_mut().poll(&mut cx);
        self.interest = CURRENT_INTEREST.with(Cell::get);
        self.failed = CURRENT_FAILED.with(Cell::get);
        result
    }

    /// The epoll interest this task wants after its most recent poll.
    /// Meaningful only while the task is still pending.
    #[must_use]
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Whether the task's most recent poll ended in [`mark_failed`]. Only
    /// meaningful once the task has reached `Poll::Ready`.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

fn slot_waker(woken: Arc<AtomicBool>) -> Waker {
    fn clone(data: *const ()) -> RawWaker {
        let arc = unsafe { Arc::from_raw(data.cast::<AtomicBool>()) };
        let cloned = Arc::clone(&arc);
        std::mem::forget(arc);
        RawWaker::new(Arc::into_raw(cloned).cast(), &VTABLE)
    }
    fn wake(data: *const ()) {
        let arc = unsafe { Arc::from_raw(data.cast::<AtomicBool>()) };
        arc.store(true, Ordering::SeqCst);
    }
    fn wake_by_ref(data: *const ()) {
        let arc = unsafe { Arc::from_raw(data.cast::<AtomicBool>()) };
        arc.store(true, Ordering::SeqCst);
        std::mem::forget(arc);
    }
    fn drop_fn(data: *const ()) {
        unsafe { drop(Arc::from_raw(data.cast::<AtomicBool>())) };
    }
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_fn);
    let raw = RawWaker::new(Arc::into_raw(woken).cast(), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}
