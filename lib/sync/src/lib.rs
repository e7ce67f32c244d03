//! Synchronization primitives built on top of the scheduling primitive:
//! a mutex, a split-ended FIFO channel, and a plain shared cell. Each one is
//! itself just a coroutine-friendly wrapper around `cond_schedule`/
//! `schedule`; none of them touch the engine directly.

mod cell;
mod channel;
mod mutex;

pub use cell::Cell;
pub use channel::{channel, Rx, Tx};
pub use mutex::Mutex;
