//! An x86-TSO memory-model harness built on the scheduling primitive.
//!
//! This is the largest client of the core: every processor instruction and
//! the store-buffer drain loop are themselves ordinary coroutines built
//! from `cond_schedule`. Registering a processor's user program and its
//! store-buffer thread as separate constructors in the same run is what
//! lets store-buffer drains interleave nondeterministically with program
//! steps, which is the whole point: that nondeterminism is what makes
//! TSO's relaxed outcomes observable at all.

mod memory;
mod processor;
mod store_buffer;

pub use memory::{GlobalMemoryLock, Memory, ProcessorId};
pub use processor::{store_buffer_drain_constructor, Processor};
pub use store_buffer::{store_buffer, Entry, StoreBufferRx, StoreBufferTx};
