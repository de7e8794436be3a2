//! Thread-local registry of tasks parked on fd exhaustion.
//!
//! The fd-bounded open helper (§4.2) yields instead of blocking when the
//! process is out of descriptors. There is no dedicated "fd became
//! available" notification on Linux, so parked wakers are simply re-polled
//! on the next event-loop pass (death-queue tick or any fd becoming ready) —
//! cheap, since a poll that still sees `EMFILE`/`ENFILE` just re-parks.

use std::cell::RefCell;
use std::task::Waker;

thread_local! {
    static PENDING: RefCell<Vec<Waker>> = const { RefCell::new(Vec::new()) };
}

/// Parks the current task's waker until the next retry sweep.
pub fn park(waker: Waker) {
    PENDING.with(|pending| pending.borrow_mut().push(waker));
}

/// Wakes every task parked on fd exhaustion on this thread. Called once per
/// event-loop iteration; over-waking is harmless, the helper just re-checks.
pub fn wake_all() {
    let parked = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
    for waker in parked {
        waker.wake();
    }
}
