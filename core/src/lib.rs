//! A deterministic-cooperative concurrency simulator.
//!
//! Users write "threads" as sequential Rust closures that call
//! [`cond_schedule`], [`schedule`], or [`finish`] at explicit scheduling
//! points. The [`Engine`] instantiates a set of threads, interleaves them
//! one step at a time choosing uniformly at random among whichever are
//! runnable, and reports one of four outcomes. The [`simsched`] driver
//! repeats this under external loop control, aggregating statistics across
//! many runs so that concurrency bugs (deadlocks, timeouts, panics) show up
//! as counts rather than one-off anecdotes.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use simsched::{schedule, Engine};
//!
//! let steps = Arc::new(AtomicUsize::new(0));
//! let steps2 = Arc::clone(&steps);
//!
//! let ctor: simsched::ThreadConstructor = Box::new(move || {
//!     let steps = Arc::clone(&steps2);
//!     Box::new(move || {
//!         steps.fetch_add(1, Ordering::SeqCst);
//!         schedule();
//!         steps.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     })
//! });
//!
//! let mut engine = Engine::with_seed(1);
//! let result = engine.run(&[ctor], 10);
//! assert!(result.is_ok());
//! assert_eq!(steps.load(Ordering::SeqCst), 2);
//! ```

mod driver;
mod engine;
mod error;
pub mod logging;
mod primitive;

pub use driver::{simsched, simsched_with_budget, FixedCount, Looper, RunStats};
pub use engine::{Engine, RunResult, DEFAULT_MAX_STEPS};
pub use error::SimError;
pub use primitive::{cond_schedule, finish, schedule, SchedulerMessage, ThreadBody, ThreadConstructor, ThreadState};
