//! The run driver: repeatedly invokes the [`Engine`] under external loop
//! control, aggregating per-outcome statistics and exposing the most recent
//! [`RunResult`] to the loop controller between runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::engine::{Engine, RunResult, DEFAULT_MAX_STEPS};
use crate::primitive::ThreadConstructor;

/// Running totals across every run a [`simsched`] call has executed, plus
/// the outcome of the most recently completed run.
///
/// Counters are monotonically non-decreasing across iterations; `last`
/// reflects only the most recently completed run, not the accumulated
/// history.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub ok: u64,
    pub deadlock: u64,
    pub timeout: u64,
    pub panic: u64,
    pub last: Option<RunResult>,
}

impl RunStats {
    pub fn total(&self) -> u64 {
        self.ok + self.deadlock + self.timeout + self.panic
    }

    fn record(&mut self, result: RunResult) {
        match &result {
            RunResult::Ok => self.ok += 1,
            RunResult::Deadlock => self.deadlock += 1,
            RunResult::Timeout => self.timeout += 1,
            RunResult::Panic(_) => self.panic += 1,
        }
        self.last = Some(result);
    }
}

/// A caller-supplied controller over how many runs [`simsched`] executes.
///
/// Implemented as a plain [`Iterator`] over `()`: each `next()` call that
/// returns `Some(())` requests one more engine run; `None` ends the loop.
/// The first tick fires *before* any run, so a looper can use it for setup.
/// Implementations own whatever long-lived state they need (counters,
/// trace buffers) and are responsible for resetting per-run state between
/// ticks; the driver only re-invokes the thread constructors.
pub trait Looper {
    fn tick(&mut self, stats: &RunStats) -> bool;
}

/// Adapts any `FnMut(&RunStats) -> bool` into a [`Looper`].
impl<F: FnMut(&RunStats) -> bool> Looper for F {
    fn tick(&mut self, stats: &RunStats) -> bool {
        self(stats)
    }
}

/// A [`Looper`] that requests exactly `n` runs regardless of their outcome.
pub struct FixedCount {
    remaining: u64,
}

impl FixedCount {
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl Looper for FixedCount {
    fn tick(&mut self, _stats: &RunStats) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

static INTERRUPTED: OnceCell<Arc<AtomicBool>> = OnceCell::new();

/// Installs the process-wide `ctrlc` handler exactly once, returning the
/// flag it sets. Idempotent: later callers just get the existing flag.
fn interrupt_flag() -> Arc<AtomicBool> {
    INTERRUPTED
        .get_or_init(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let flag2 = Arc::clone(&flag);
            if let Err(e) = ctrlc::set_handler(move || {
                flag2.store(true, Ordering::SeqCst);
            }) {
                warn!("failed to install interrupt handler: {e}");
            }
            flag
        })
        .clone()
}

/// Runs `constructors` to completion, over and over, under control of
/// `looper`, with a fixed step budget per run.
///
/// Equivalent to [`simsched`] but lets the caller override `max_steps`
/// (which otherwise defaults to [`DEFAULT_MAX_STEPS`]).
pub fn simsched_with_budget(
    constructors: Vec<ThreadConstructor>,
    max_steps: usize,
    mut looper: impl Looper,
) -> RunStats {
    let interrupted = interrupt_flag();
    let mut stats = RunStats::default();
    let mut engine = Engine::<Xoshiro256PlusPlus>::new();

    info!(
        "starting driver loop over {} thread constructors",
        constructors.len()
    );

    loop {
        if interrupted.load(Ordering::SeqCst) {
            info!("driver loop stopped by external interrupt");
            break;
        }
        if !looper.tick(&stats) {
            break;
        }
        if interrupted.load(Ordering::SeqCst) {
            info!("driver loop stopped by external interrupt");
            break;
        }

        let result = engine.run(&constructors, max_steps);
        debug!("run #{} completed: {:?}", stats.total() + 1, result);
        stats.record(result);
    }

    info!(
        "driver loop finished: ok={} deadlock={} timeout={} panic={}",
        stats.ok, stats.deadlock, stats.timeout, stats.panic
    );
    stats
}

/// Runs `constructors` to completion, over and over, under control of
/// `looper`, with the default step budget.
///
/// The driver materializes `constructors` once (iteration order is stable
/// across runs), then ticks `looper` until it returns `false` or the
/// process receives an interrupt signal. The accumulated [`RunStats`] is
/// always returned, even on interrupt. Panics encountered during a run are
/// counted, not propagated: only the interrupt breaks the loop early.
pub fn simsched(constructors: Vec<ThreadConstructor>, looper: impl Looper) -> RunStats {
    simsched_with_budget(constructors, DEFAULT_MAX_STEPS, looper)
}
