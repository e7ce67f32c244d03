use simsched_sync::Cell;
use simsched::{cond_schedule, schedule};

/// Identifies a processor for the purposes of the global memory lock's
/// ownership check. Plain `usize` rather than a newtype, since every
/// litmus test assigns processors a small dense index anyway.
pub type ProcessorId = usize;

/// Flat main memory, addressed by index. Reads and writes here never
/// suspend: they model the instant the store-buffer pseudo-thread (or,
/// for a plain load that misses the store buffer, the processor itself)
/// actually touches memory.
pub struct Memory {
    cells: Vec<Cell<i64>>,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Self {
            cells: (0..size).map(|_| Cell::new(0)).collect(),
        }
    }

    pub fn load(&self, addr: usize) -> i64 {
        self.cells[addr].get()
    }

    pub fn store(&self, addr: usize, value: i64) {
        self.cells[addr].set(value);
    }
}

/// The global memory lock `xchg` and the locked read-modify-write
/// instructions hold for the duration of their critical section, and that
/// a plain load must find unheld before it may proceed.
///
/// Held by at most one processor at a time. The store-buffer pseudo-thread
/// does not acquire it to drain a write: it only waits for the lock to be
/// either free or held by its *own* processor, since a processor's locked
/// instructions push through the same buffer they would otherwise race.
pub struct GlobalMemoryLock {
    held_by: Cell<Option<ProcessorId>>,
}

impl Default for GlobalMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMemoryLock {
    pub fn new() -> Self {
        Self {
            held_by: Cell::new(None),
        }
    }

    /// Blocks until the lock is free, then acquires it for `id`.
    pub fn acquire(&self, id: ProcessorId) {
        cond_schedule(|| self.held_by.get().is_none());
        self.held_by.set(Some(id));
    }

    /// Blocks until the lock is free (a plain load's precondition: it may
    /// not proceed while any processor holds the lock, including the
    /// calling one, since the calling processor never holds it outside an
    /// `xchg`/locked-RMW critical section that a plain load can't run
    /// inside of).
    pub fn wait_until_free(&self) {
        cond_schedule(|| self.held_by.get().is_none());
    }

    /// True if the lock is free, or held by `id`: the drain condition the
    /// store-buffer pseudo-thread waits on.
    pub fn is_free_for(&self, id: ProcessorId) -> bool {
        match self.held_by.get() {
            None => true,
            Some(holder) => holder == id,
        }
    }

    /// Releases the lock held by `id`, then offers a context switch.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not currently hold the lock, a scheduling
    /// contract violation in the harness itself, not a user-facing error.
    pub fn release(&self, id: ProcessorId) {
        assert_eq!(
            self.held_by.get(),
            Some(id),
            "release() by a processor that does not hold the lock"
        );
        self.held_by.set(None);
        schedule();
    }
}
