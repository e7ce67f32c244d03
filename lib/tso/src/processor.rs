use std::collections::HashMap;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use simsched::{schedule, ThreadBody, ThreadConstructor};

use crate::memory::{GlobalMemoryLock, Memory, ProcessorId};
use crate::store_buffer::{self, StoreBufferRx, StoreBufferTx};

/// One simulated CPU: a register file, a handle to shared main memory, the
/// memory bus's global lock, and this processor's own store buffer.
///
/// Registers are named rather than numbered (`"r1"`, `"r2"`, ...) purely
/// because that is how the litmus tests that exercise this harness name
/// them; any string works as a register name and unread registers default
/// to zero.
pub struct Processor {
    id: ProcessorId,
    registers: AtomicRefCell<HashMap<&'static str, i64>>,
    memory: Arc<Memory>,
    lock: Arc<GlobalMemoryLock>,
    store_tx: StoreBufferTx,
}

impl Processor {
    pub fn new(
        id: ProcessorId,
        memory: Arc<Memory>,
        lock: Arc<GlobalMemoryLock>,
        store_tx: StoreBufferTx,
    ) -> Self {
        Self {
            id,
            registers: AtomicRefCell::new(HashMap::new()),
            memory,
            lock,
            store_tx,
        }
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn reg(&self, name: &'static str) -> i64 {
        *self.registers.borrow().get(name).unwrap_or(&0)
    }

    /// Looks up `addr`'s value: this processor's own store buffer first
    /// (store forwarding), falling through to main memory on a miss.
    fn lookup(&self, addr: usize) -> i64 {
        store_buffer::forwarded_value(&self.store_tx, addr).unwrap_or_else(|| self.memory.load(addr))
    }

    /// `mov reg, reg` / `mov reg, imm`, a pure register move that never
    /// touches memory and never suspends.
    pub fn mov_imm(&self, dst: &'static str, value: i64) {
        self.registers.borrow_mut().insert(dst, value);
    }

    pub fn mov_reg(&self, dst: &'static str, src: &'static str) {
        let v = self.reg(src);
        self.registers.borrow_mut().insert(dst, v);
    }

    /// `mov reg, [addr]`, a load. Blocks until the global memory lock is
    /// free, so a plain load can never observe memory mid-`xchg`/locked-RMW,
    /// then resolves through store forwarding.
    pub fn load(&self, dst: &'static str, addr: usize) {
        self.lock.wait_until_free();
        let value = self.lookup(addr);
        self.registers.borrow_mut().insert(dst, value);
    }

    /// `mov [addr], reg` / `mov [addr], imm`, a store. Enqueues into this
    /// processor's store buffer and returns immediately; the write becomes
    /// visible to other processors only once the store-buffer thread
    /// drains it.
    pub fn store_reg(&self, addr: usize, src: &'static str) {
        self.store_tx.send(Some((addr, self.reg(src))));
    }

    pub fn store_imm(&self, addr: usize, value: i64) {
        self.store_tx.send(Some((addr, value)));
    }

    /// `mfence`, blocks until this processor's store buffer has fully
    /// drained.
    pub fn mfence(&self) {
        simsched::cond_schedule(|| self.store_tx.is_empty());
    }

    /// `xchg reg, [addr]`, atomically swaps `reg` with the value at `addr`.
    /// Acquires the global lock, resolves the old value through store
    /// forwarding (the lock excludes every other writer, but not this
    /// processor's own undrained writes), writes the new value back
    /// through the store buffer, fences it out, then releases the lock.
    pub fn xchg(&self, reg: &'static str, addr: usize) {
        self.lock.acquire(self.id);
        let old = self.lookup(addr);
        let new = self.reg(reg);
        self.registers.borrow_mut().insert(reg, old);
        self.store_tx.send(Some((addr, new)));
        self.mfence();
        self.lock.release(self.id);
    }

    /// `inc [addr]`, an ordinary (non-atomic) read-modify-write: a load
    /// followed by a store, exactly as if written out by hand. Another
    /// processor's step may land between the two.
    pub fn inc(&self, addr: usize) {
        self.load("__inc_tmp", addr);
        let v = self.reg("__inc_tmp") + 1;
        self.store_imm(addr, v);
    }

    /// `lock xadd reg, [addr]`, atomic fetch-and-add: `reg` receives the
    /// prior value at `addr`, which becomes `prior + reg`.
    pub fn lock_xadd(&self, reg: &'static str, addr: usize) {
        self.lock.acquire(self.id);
        let old = self.lookup(addr);
        let delta = self.reg(reg);
        self.registers.borrow_mut().insert(reg, old);
        self.store_tx.send(Some((addr, old + delta)));
        self.mfence();
        self.lock.release(self.id);
    }

    /// `lock dec [addr]`, atomic decrement-and-test; returns whether the
    /// new value is zero, mirroring x86's zero flag.
    pub fn lock_dec(&self, addr: usize) -> bool {
        self.lock.acquire(self.id);
        let new = self.lookup(addr) - 1;
        self.store_tx.send(Some((addr, new)));
        self.mfence();
        self.lock.release(self.id);
        new == 0
    }

    /// Marks this processor's instruction stream finished by sending the
    /// `None` sentinel its store-buffer drain thread exits on.
    pub fn retire(&self) {
        self.store_tx.send(None);
        schedule();
    }
}

/// Builds the [`ThreadConstructor`] for a processor's store-buffer drain
/// thread, the auxiliary pseudo-thread registered in the engine's
/// constructor list alongside every processor's own user program.
pub fn store_buffer_drain_constructor(
    id: ProcessorId,
    lock: Arc<GlobalMemoryLock>,
    memory: Arc<Memory>,
    store_rx: StoreBufferRx,
) -> ThreadConstructor {
    Box::new(move || -> ThreadBody {
        let lock = Arc::clone(&lock);
        let memory = Arc::clone(&memory);
        let store_rx = store_rx.clone();
        Box::new(move || {
            store_buffer::drain_loop(id, &store_rx, &lock, &memory);
            Ok(())
        })
    })
}
