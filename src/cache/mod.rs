//! Content Cache Facade (§4.5): key → refcounted entry, non-blocking fast path.
//!
//! Reference counting is just `Arc` clone/drop; `unref` is modeled as
//! dropping the handle rather than a hand-rolled counter. The at-most-one-
//! concurrent-constructor-per-key guarantee is implemented with a per-key
//! in-progress marker in a [`DashMap`], mirroring the per-domain state map
//! the teacher codebase already uses for serialized per-key access.

mod entry;

pub use entry::{CacheEntry, CacheEntryKind, DEFLATE_HEADER_COST, IN_MEMORY_THRESHOLD};

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;
use tracing::instrument;

use crate::error::ServeError;

/// Outcome of a cache lookup (§4.5).
pub enum Lookup {
    /// A usable, refcounted entry.
    Hit(Arc<CacheEntry>),
    /// Another task is constructing this key right now; the caller should
    /// either fall back to a floating entry or retry.
    WouldBlock,
    /// Construction failed.
    Err(ServeError),
}

enum Slot {
    /// Someone is constructing this entry; concurrent lookups see `WouldBlock`.
    InProgress,
    Ready(Arc<CacheEntry>),
}

/// Concurrent, key-indexed content cache. One instance is shared across all
/// of a server's event-loop threads.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: DashMap<String, Slot>,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::InProgress => write!(f, "InProgress"),
            Slot::Ready(_) => write!(f, "Ready"),
        }
    }
}

impl ContentCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key`, constructing it via `factory` on a miss. Returns
    /// `WouldBlock` without waiting if another task already holds the
    /// in-progress marker for this key.
    #[instrument(skip(self, factory), fields(key))]
    pub fn get_and_ref(
        &self,
        key: &str,
        factory: impl FnOnce() -> Result<CacheEntry, ServeError>,
    ) -> Lookup {
        match self.entries.entry(key.to_string()) {
            DashEntry::Occupied(occupied) => match occupied.get() {
                Slot::Ready(entry) => Lookup::Hit(Arc::clone(entry)),
                Slot::InProgress => Lookup::WouldBlock,
            },
            DashEntry::Vacant(vacant) => {
                vacant.insert(Slot::InProgress);
                self.finish_construction(key, factory)
            }
        }
    }

    fn finish_construction(
        &self,
        key: &str,
        factory: impl FnOnce() -> Result<CacheEntry, ServeError>,
    ) -> Lookup {
        match factory() {
            Ok(entry) => {
                let entry = Arc::new(entry);
                self.entries
                    .insert(key.to_string(), Slot::Ready(Arc::clone(&entry)));
                Lookup::Hit(entry)
            }
            Err(e) => {
                self.entries.remove(key);
                Lookup::Err(e)
            }
        }
    }

    /// Same contract as [`Self::get_and_ref`], but on `WouldBlock` — another
    /// task already holds the in-progress marker for this key — synthesizes
    /// a floating entry via `floating_factory` instead of making the caller
    /// retry (§4.5). The floating entry is never indexed into the cache; it
    /// lives only as long as the `Arc` this returns, bound to the calling
    /// task.
    #[instrument(skip(self, factory, floating_factory), fields(key))]
    pub fn coro_get_and_ref(
        &self,
        key: &str,
        factory: impl FnOnce() -> Result<CacheEntry, ServeError>,
        floating_factory: impl FnOnce() -> Result<CacheEntry, ServeError>,
    ) -> Result<Arc<CacheEntry>, ServeError> {
        match self.get_and_ref(key, factory) {
            Lookup::Hit(entry) => Ok(entry),
            Lookup::Err(e) => Err(e),
            Lookup::WouldBlock => floating_factory().map(Arc::new),
        }
    }

    /// Number of keys currently indexed (ready or in-progress).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts `key` outright, regardless of outstanding references held by
    /// other tasks (they keep their `Arc` until they drop it).
    pub fn evict(&self, key: &str) {
        self.entries.remove(key);
    }
}
