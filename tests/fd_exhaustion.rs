//! Verifies the fd-bounded open helper yields (rather than erroring or
//! blocking) when the process runs out of file descriptors, and recovers
//! once the limit is restored.

mod support;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use fileserved_core::fd::{OpenModeFlags, open_bounded};

fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    fn noop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

#[test]
fn open_bounded_yields_pending_under_fd_exhaustion() {
    let (_dir, root) = support::scenario_root();

    // Burn through descriptors first so the real limit (however low this
    // environment's default is) has something to bite against, then clamp
    // the soft limit to whatever is currently in use plus a sliver of room.
    let mut held = Vec::new();
    while held.len() < 4096 {
        match std::fs::File::open("/dev/null") {
            Ok(f) => held.push(f),
            Err(_) => break,
        }
    }
    let currently_open = held.len() as u64 + 16;
    drop(held);

    let Some(_guard) = support::fd_limit::exhausted_file_descriptors(currently_open.min(32)) else {
        eprintln!("skipping: could not adjust RLIMIT_NOFILE in this environment");
        return;
    };

    // Exhaust the now-tiny limit.
    let mut holders = Vec::new();
    for _ in 0..64 {
        match std::fs::File::open("/dev/null") {
            Ok(f) => holders.push(f),
            Err(_) => break,
        }
    }

    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut fut = open_bounded(&root, "hello.txt", OpenModeFlags::new(false));
    let outcome = Pin::new(&mut fut).poll(&mut cx);

    drop(holders);

    match outcome {
        Poll::Pending => {}
        Poll::Ready(Ok(_)) => {
            // This environment had enough headroom despite the lowered
            // limit (e.g. running as a privileged user); not a failure.
        }
        Poll::Ready(Err(e)) => panic!("expected Pending or Ok under fd pressure, got {e}"),
    }
}
