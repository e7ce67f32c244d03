use simsched::cond_schedule;
use simsched_sync::{channel, Rx, Tx};

use crate::memory::{GlobalMemoryLock, Memory, ProcessorId};

/// A single pending write: address and value, in program order.
pub type Entry = (usize, i64);

/// The sending half of a processor's store buffer, held by the processor
/// itself. Pushing through it is what lets writes retire from the
/// processor's point of view instantly while staying invisible to other
/// processors until drained. A `None` sent through the same channel is the
/// sentinel that tells the drain pseudo-thread the owning processor is
/// done issuing instructions.
pub type StoreBufferTx = Tx<Option<Entry>>;

/// The receiving half, held by the store-buffer drain pseudo-thread.
pub type StoreBufferRx = Rx<Option<Entry>>;

/// Creates a processor's store buffer: a paired channel carrying pending
/// writes from the processor to its own drain thread, terminated by one
/// `None`.
pub fn store_buffer() -> (StoreBufferTx, StoreBufferRx) {
    channel()
}

/// Scans pending writes newest-to-oldest for the most recent write to
/// `addr`. This is TSO's store-forwarding: a processor always sees its own
/// writes immediately, even before they reach main memory.
pub fn forwarded_value(tx: &StoreBufferTx, addr: usize) -> Option<i64> {
    let mut found = None;
    tx.scan(|entry| {
        if let Some((a, v)) = entry {
            if *a == addr {
                found = Some(*v);
            }
        }
    });
    found
}

/// Drains `rx` to `memory`, one entry per turn, gated by `lock`. Intended
/// to run as its own simulated thread, registered alongside the
/// processor's user thread; see
/// [`crate::processor::store_buffer_drain_constructor`].
///
/// Runs until it consumes the owning processor's `None` sentinel, at which
/// point it returns so the engine can retire this pseudo-thread like any
/// other.
pub fn drain_loop(id: ProcessorId, rx: &StoreBufferRx, lock: &GlobalMemoryLock, memory: &Memory) {
    loop {
        let head = rx.peek();
        match head {
            Some((addr, value)) => {
                cond_schedule(|| lock.is_free_for(id));
                memory.store(addr, value);
                rx.consume();
            }
            None => {
                rx.consume();
                return;
            }
        }
    }
}
