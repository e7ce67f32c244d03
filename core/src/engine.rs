//! The simulation engine: spawns threads, polls readiness, advances one
//! random runnable thread per step, and classifies the outcome of a run.

use std::any::Any;

use log::{debug, info, trace, warn};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::SimError;
use crate::primitive::{
    spawn_thread, EngineHandle, SchedulerMessage, ThreadConstructor, ThreadEvent, ThreadState,
    TornDown,
};

/// Steps run without an explicit budget.
pub const DEFAULT_MAX_STEPS: usize = 1000;

/// The outcome of a single [`Engine::run`].
#[derive(Debug, Clone)]
pub enum RunResult {
    /// Every thread reached `Final` within the step budget.
    Ok,
    /// The runnable set went empty while threads remained live.
    Deadlock,
    /// The step budget was exhausted before the run finished.
    Timeout,
    /// A thread's step (or its readiness predicate) raised an error.
    Panic(SimError),
}

impl RunResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, RunResult::Ok)
    }
}

/// Drives simulated threads to completion, one step at a time, choosing
/// uniformly at random among the currently runnable threads.
///
/// The RNG is a construction-time dependency so that a fixed seed
/// reproduces an identical sequence of runs (see [`Engine::with_seed`]).
pub struct Engine<R = Xoshiro256PlusPlus> {
    rng: R,
}

impl Engine<Xoshiro256PlusPlus> {
    /// Seeds the engine's RNG from the OS entropy source.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Seeds the engine's RNG deterministically. Two engines constructed
    /// with the same seed, run over the same constructors, produce
    /// identical step sequences and identical [`RunResult`]s.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }
}

impl Default for Engine<Xoshiro256PlusPlus> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> Engine<R> {
    /// Builds an engine around a caller-supplied RNG, for callers that need
    /// a specific algorithm or want to seed it themselves.
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Validates `max_steps` and, if acceptable, runs `constructors` to
    /// completion.
    ///
    /// This is the caller-error counterpart to [`Engine::run`]: an
    /// out-of-range `max_steps` is a mistake by whoever is constructing the
    /// run, not an outcome of one, so it is reported through an
    /// `anyhow`-style contextual [`anyhow::Result`] rather than folded into
    /// [`RunResult`]'s four-way outcome or left to an assertion.
    pub fn try_run(
        &mut self,
        constructors: &[ThreadConstructor],
        max_steps: usize,
    ) -> anyhow::Result<RunResult> {
        anyhow::ensure!(
            max_steps >= 1,
            "max_steps must be at least 1, got {max_steps}"
        );
        Ok(self.run(constructors, max_steps))
    }

    /// Runs `constructors` to completion, or until `max_steps` steps have
    /// executed without termination.
    ///
    /// Spawns one OS thread per constructor, drives each to its first
    /// suspension, then repeatedly: polls every live thread for readiness,
    /// checks for `Ok`/`Deadlock`, and, if neither, resumes one runnable
    /// thread chosen uniformly at random. Always tears every spawned thread
    /// down before returning, regardless of outcome.
    ///
    /// # Panics
    ///
    /// Panics if `max_steps` is zero. Callers that would rather receive an
    /// error than panic on a bad `max_steps` should use [`Engine::try_run`].
    pub fn run(&mut self, constructors: &[ThreadConstructor], max_steps: usize) -> RunResult {
        assert!(max_steps >= 1, "max_steps must be at least 1");

        let _silence_teardown_panics = PanicHookGuard::install();

        let mut threads = Vec::with_capacity(constructors.len());
        let mut join_handles = Vec::with_capacity(constructors.len());

        for (i, ctor) in constructors.iter().enumerate() {
            let body = ctor();
            let (handle, join) = spawn_thread(body);
            debug!("spawned thread {i}");
            let first = handle.first_suspend();
            threads.push(handle);
            join_handles.push(join);
            match first {
                Some(ThreadEvent::Suspend(ThreadState::Yield)) => {}
                Some(ThreadEvent::Suspend(other)) => {
                    panic!("thread's leading schedule() suspended with {other:?}, expected Yield")
                }
                Some(ThreadEvent::Panicked(e)) => {
                    warn!("thread {i} panicked before its first suspension: {e}");
                    teardown(threads, join_handles);
                    return RunResult::Panic(e);
                }
                None => panic!("thread exited before its first suspension"),
            }
        }

        let mut live: Vec<usize> = (0..threads.len()).collect();
        let budget = max_steps + threads.len();

        for _ in 0..budget {
            let mut runnable = Vec::new();
            let mut next_live = Vec::new();

            for &idx in &live {
                trace!("poll -> thread {idx}");
                match threads[idx].send(SchedulerMessage::Poll) {
                    Some(ThreadEvent::Suspend(ThreadState::Final)) => {
                        debug!("thread {idx} reached Final");
                    }
                    Some(ThreadEvent::Suspend(ThreadState::Ready)) => {
                        runnable.push(idx);
                        next_live.push(idx);
                    }
                    Some(ThreadEvent::Suspend(ThreadState::Block)) => next_live.push(idx),
                    Some(ThreadEvent::Suspend(ThreadState::Yield)) => {
                        panic!("thread suspended with Yield in reply to Poll")
                    }
                    Some(ThreadEvent::Panicked(e)) => {
                        warn!("thread {idx} panicked during poll: {e}");
                        teardown(threads, join_handles);
                        return RunResult::Panic(e);
                    }
                    None => panic!("thread disconnected mid-poll"),
                }
            }

            live = next_live;

            if runnable.is_empty() {
                let result = if live.is_empty() {
                    RunResult::Ok
                } else {
                    RunResult::Deadlock
                };
                info!("run finished: {result:?}");
                teardown(threads, join_handles);
                return result;
            }

            let chosen = runnable[self.rng.gen_range(0..runnable.len())];
            trace!("cont -> thread {chosen}");
            match threads[chosen].send(SchedulerMessage::Cont) {
                Some(ThreadEvent::Suspend(ThreadState::Yield)) => {}
                Some(ThreadEvent::Suspend(other)) => {
                    panic!("thread suspended with {other:?} after Cont, expected Yield")
                }
                Some(ThreadEvent::Panicked(e)) => {
                    warn!("thread {chosen} panicked during its step: {e}");
                    teardown(threads, join_handles);
                    return RunResult::Panic(e);
                }
                None => panic!("thread disconnected mid-step"),
            }
        }

        info!("run finished: Timeout");
        teardown(threads, join_handles);
        RunResult::Timeout
    }
}

/// Drops every thread's channels (unwinding any that are still parked) and
/// joins every OS thread, so no thread outlives the run that spawned it.
fn teardown(threads: Vec<EngineHandle>, join_handles: Vec<std::thread::JoinHandle<()>>) {
    drop(threads);
    for join in join_handles {
        if let Err(payload) = join.join() {
            expect_torn_down(payload);
        }
    }
}

/// A thread unwound by something other than the engine's own teardown
/// signal is a scheduling contract violation and may crash the process;
/// re-panic on the engine's thread with the original message rather than
/// swallowing it.
fn expect_torn_down(payload: Box<dyn Any + Send>) {
    if payload.downcast_ref::<TornDown>().is_some() {
        return;
    }
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "a simulated thread panicked with a non-string payload".to_string());
    panic!("simulated thread violated the scheduling contract: {message}");
}

/// Installs a panic hook that prints nothing, for the duration this guard
/// is alive, restoring whatever hook was previously installed on drop.
///
/// A successful run unwinds every thread that finished via `finish()` when
/// the engine tears it down at the end of `run()` (see
/// [`crate::primitive::TornDown`]); without this, every run would print one
/// "thread panicked" message per thread to stderr.
struct PanicHookGuard {
    previous: Option<Box<dyn Fn(&std::panic::PanicInfo<'_>) + Sync + Send + 'static>>,
}

impl PanicHookGuard {
    fn install() -> Self {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_info| {}));
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            std::panic::set_hook(previous);
        }
    }
}
