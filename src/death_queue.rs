//! Death Queue (§4.3): time-ordered reap list for idle keep-alive connections.
//!
//! A fixed-capacity ring of request-slot indices. A connection is pushed
//! exactly once, when it first becomes a keep-alive candidate; every
//! subsequent activity just bumps the slot's own `time_to_die` field (owned
//! by the caller's request table, not by the ring) rather than re-pushing.
//! Because every bump applies the same keep-alive increment, insertion order
//! still tracks deadline order closely enough to sweep front-to-back and
//! stop at the first still-live deadline — a FIFO, not a priority queue.

/// Fixed-capacity ring buffer of request-slot indices awaiting idle-timeout reap.
#[derive(Debug)]
pub struct DeathQueue {
    ring: Vec<Option<usize>>,
    first: usize,
    population: usize,
    /// Monotonically increasing logical clock, advanced once per idle tick.
    clock: u64,
}

impl DeathQueue {
    /// Creates a queue with room for `capacity` concurrent connections.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: vec![None; capacity.max(1)],
            first: 0,
            population: 0,
            clock: 0,
        }
    }

    /// Whether the queue currently holds any entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.population == 0
    }

    /// Number of connections currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.population
    }

    /// Current logical clock value.
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Pushes a connection's slot index. Must only be called once per
    /// connection — the caller's `in_death_queue` flag guards re-entry;
    /// later activity on the same connection updates its deadline in place
    /// instead of pushing again.
    ///
    /// Returns `false` without mutating anything if the ring is already at
    /// capacity; the caller is expected to reject the connection (`503`)
    /// rather than let the queue overflow.
    #[must_use]
    pub fn push(&mut self, slot: usize) -> bool {
        if self.population >= self.ring.len() {
            return false;
        }
        let last = (self.first + self.population) % self.ring.len();
        self.ring[last] = Some(slot);
        self.population += 1;
        true
    }

    /// Pops the oldest entry, regardless of its deadline.
    pub fn pop(&mut self) -> Option<usize> {
        if self.population == 0 {
            return None;
        }
        let entry = self.ring[self.first].take();
        self.first = (self.first + 1) % self.ring.len();
        self.population -= 1;
        entry
    }

    /// Peeks the oldest entry's slot without removing it.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.ring[self.first]
    }

    /// epoll wait timeout in milliseconds: 1000 while entries are pending,
    /// otherwise block indefinitely (`None`).
    #[must_use]
    pub fn epoll_timeout(&self) -> Option<u32> {
        if self.is_empty() { None } else { Some(1000) }
    }

    /// Advances the clock by one tick.
    pub fn tick(&mut self) {
        self.clock += 1;
    }

    /// Sweeps the front of the ring. For each entry, `time_to_die` is asked
    /// for that slot's *current* deadline: `None` means the connection
    /// already died from a concurrent hangup, so the entry is popped and
    /// silently dropped; `Some(deadline)` is compared against the clock as
    /// usual. The sweep stops at the first entry whose live deadline is
    /// still in the future — since activity only ever pushes deadlines
    /// forward by the same increment, this is equivalent to sweeping a
    /// priority queue without paying for one.
    pub fn kill_waiting(
        &mut self,
        mut time_to_die: impl FnMut(usize) -> Option<u64>,
        mut on_expire: impl FnMut(usize),
    ) {
        while let Some(slot) = self.ring[self.first] {
            match time_to_die(slot) {
                None => {
                    self.ring[self.first] = None;
                    self.first = (self.first + 1) % self.ring.len();
                    self.population -= 1;
                }
                Some(deadline) if deadline > self.clock => break,
                Some(_) => {
                    self.ring[self.first] = None;
                    self.first = (self.first + 1) % self.ring.len();
                    self.population -= 1;
                    on_expire(slot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_matches_push_order() {
        let mut q = DeathQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.first(), Some(1));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn kill_waiting_never_evicts_future_deadlines() {
        let mut q = DeathQueue::new(4);
        q.push(1);
        q.push(2);
        q.clock = 10;

        let deadlines = [(1usize, 5u64), (2, 15)];
        let mut expired = Vec::new();
        q.kill_waiting(
            |slot| deadlines.iter().find(|(s, _)| *s == slot).map(|(_, d)| *d),
            |slot| expired.push(slot),
        );

        assert_eq!(expired, vec![1]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.first(), Some(2));
    }

    #[test]
    fn kill_waiting_skips_concurrently_cleared_entries() {
        let mut q = DeathQueue::new(4);
        q.push(1);
        q.push(2);
        q.clock = 5;

        let mut expired = Vec::new();
        // slot 1 reports None: it already died from a concurrent hangup.
        q.kill_waiting(
            |slot| if slot == 1 { None } else { Some(5) },
            |slot| expired.push(slot),
        );

        assert_eq!(expired, vec![2]);
        assert!(q.is_empty());
    }

    #[test]
    fn live_deadline_bump_postpones_eviction_without_repushing() {
        // A connection pushed once, then its deadline bumped by activity,
        // must survive a sweep at a clock value past its original deadline.
        let mut q = DeathQueue::new(4);
        q.push(1);
        q.clock = 100;

        let current_deadline = 200u64; // bumped well past the sweep clock
        let mut expired = Vec::new();
        q.kill_waiting(|_| Some(current_deadline), |slot| expired.push(slot));

        assert!(expired.is_empty());
        assert_eq!(q.len(), 1, "entry must still be queued, not re-pushed or dropped");
    }

    #[test]
    fn epoll_timeout_reflects_population() {
        let mut q = DeathQueue::new(4);
        assert_eq!(q.epoll_timeout(), None);
        q.push(1);
        assert_eq!(q.epoll_timeout(), Some(1000));
    }

    #[test]
    fn push_beyond_capacity_is_rejected_without_mutation() {
        let mut q = DeathQueue::new(1);
        assert!(q.push(1));
        assert!(!q.push(2));
        assert_eq!(q.len(), 1);
        assert_eq!(q.first(), Some(1));
    }
}
