//! Monotonic id allocation for containers and files (spec §4.1, §8 "Id monotonicity").
//!
//! An [`IdAllocator`] hands out strictly increasing 64-bit ids. It is
//! seeded from the highest id observed while replaying a change log, so
//! that ids issued after a restart are always greater than any id ever
//! replayed - the invariant a test suite must verify.

use std::sync::atomic::{AtomicU64, Ordering};

/// Id of the namespace root container (spec §3: "root has id 1").
pub const ROOT_CONTAINER_ID: u64 = 1;

/// Strictly-increasing id source.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator that will hand out `highest_seen + 1` next.
    pub fn starting_after(highest_seen: u64) -> Self {
        Self { next: AtomicU64::new(highest_seen + 1) }
    }

    /// Allocates the next id, strictly greater than any previously
    /// allocated or observed id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Folds an observed id into the allocator so that future calls to
    /// [`IdAllocator::next`] never collide with it. Used while replaying
    /// a change log.
    pub fn observe(&self, id: u64) {
        self.next.fetch_max(id + 1, Ordering::SeqCst);
    }

    /// The id that would be returned by the next call to [`IdAllocator::next`].
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        // Root container pre-occupies id 1.
        Self::starting_after(ROOT_CONTAINER_ID)
    }
}
