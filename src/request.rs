//! Per-connection request state (§3): a dense table indexed by fd, so a
//! hung-up connection's slot is found and reused in O(1) without a hash
//! lookup on the hot path.

use crate::fd::ResourceSet;
use crate::serve::ServeRequest;
use crate::task::Task;

/// Everything the event loop tracks for one live connection.
#[derive(Default)]
pub struct RequestSlot {
    /// Whether this slot currently holds a live connection. Distinguishes a
    /// genuinely-idle fd from one the kernel reused after a close.
    pub alive: bool,
    /// The in-flight cooperative task serving this connection, if any.
    pub task: Option<Task>,
    /// fds opened on this connection's behalf, closed together on teardown.
    pub resources: ResourceSet,
    /// Death-queue deadline (logical clock ticks), valid only when `in_death_queue`.
    pub time_to_die: u64,
    /// Whether this slot currently has an entry pushed onto the death queue.
    pub in_death_queue: bool,
    /// Whether the fd is currently registered for writability (`true`) vs
    /// readability (`false`); re-armed by the event loop whenever the
    /// attached task's interest changes.
    pub write_events: bool,
    /// The parsed request once header parsing (out of scope here) completes.
    pub request: Option<ServeRequest>,
}

impl RequestSlot {
    /// Resets a slot for reuse by a newly accepted connection on the same fd.
    pub fn reset(&mut self) {
        self.alive = true;
        self.task = None;
        self.resources = ResourceSet::new();
        self.time_to_die = 0;
        self.in_death_queue = false;
        self.write_events = false;
        self.request = None;
    }

    /// Tears down a slot: drops its task (and, with it, everything the task
    /// was holding) and closes every resource it owned.
    pub fn teardown(&mut self) {
        self.alive = false;
        self.task = None;
        self.resources = ResourceSet::new();
        self.in_death_queue = false;
        self.write_events = false;
        self.request = None;
    }
}

/// Dense, fd-indexed table of connection state for one event-loop thread.
pub struct RequestTable {
    slots: Vec<RequestSlot>,
}

impl RequestTable {
    /// Creates a table sized for `capacity` concurrent fds.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, RequestSlot::default);
        Self { slots }
    }

    /// Borrows the slot for `fd`, growing the table if the kernel handed out
    /// an fd past the current high-water mark.
    pub fn slot_mut(&mut self, fd: i32) -> &mut RequestSlot {
        let index = fd as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, RequestSlot::default);
        }
        &mut self.slots[index]
    }

    /// Borrows the slot for `fd`, if the table has ever been grown to cover it.
    #[must_use]
    pub fn get(&self, fd: i32) -> Option<&RequestSlot> {
        self.slots.get(fd as usize)
    }

    /// Number of fd-slots currently allocated (not all necessarily alive).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_mut_grows_table_on_demand() {
        let mut table = RequestTable::new(4);
        assert_eq!(table.capacity(), 4);
        table.slot_mut(10).alive = true;
        assert_eq!(table.capacity(), 11);
        assert!(table.get(10).unwrap().alive);
    }

    #[test]
    fn teardown_clears_liveness_and_task() {
        let mut table = RequestTable::new(1);
        let slot = table.slot_mut(0);
        slot.reset();
        slot.task = Some(Task::spawn(async {}));
        slot.teardown();
        assert!(!table.get(0).unwrap().alive);
        assert!(table.get(0).unwrap().task.is_none());
    }
}
