//! The scheduling primitive: the suspension/resumption protocol shared by
//! every simulated thread and the engine that drives it.
//!
//! Stable Rust has no generalized two-way generator, so each simulated
//! thread is realized as a real OS thread paired with a pair of
//! zero-capacity ("rendezvous") channels, one carrying [`SchedulerMessage`]
//! from the engine to the thread, one carrying a suspension event the other
//! way. A rendezvous send only completes once the other side is ready to
//! receive it, so the engine and a thread are never both unblocked at once:
//! the engine blocks on a receive immediately after every send, and a thread
//! blocks on a receive immediately after every send. This keeps the
//! observable execution history single-threaded even though more than one
//! OS thread exists underneath.
//!
//! The handle for the currently running simulated thread is published
//! through a thread-local, read by the free functions below, the same way
//! the scheduler this crate is modeled on exposes other per-thread ambient
//! state (e.g. a core affinity) to free functions rather than threading a
//! context argument through every call site.

use std::cell::RefCell;

use crate::error::SimError;

/// Tag a thread publishes to the engine when it suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Reached a sequencing point; awaiting a command.
    Yield,
    /// Currently runnable.
    Ready,
    /// Not runnable right now.
    Block,
    /// Finished; must never be scheduled again.
    Final,
}

/// Command the engine sends a thread when resuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMessage {
    /// Report whether you are currently runnable.
    Poll,
    /// You may execute your next step.
    Cont,
}

/// Event a thread sends the engine. Carries either a normal suspension, or
/// an error a step raised (the only way a user-visible error crosses the
/// thread/engine boundary).
#[derive(Debug)]
pub(crate) enum ThreadEvent {
    Suspend(ThreadState),
    Panicked(SimError),
}

/// Unwind payload used to unwind a thread that the engine has already torn
/// down (its channels were dropped). Not a [`SimError`]: it never reaches a
/// `RunResult`, it just unwinds the thread's stack so it can exit instead of
/// running disconnected, unsupervised user code.
pub(crate) struct TornDown;

/// The thread-side half of a spawned thread's channel pair.
pub(crate) struct Control {
    pub(crate) to_engine: crossbeam::channel::Sender<ThreadEvent>,
    pub(crate) from_engine: crossbeam::channel::Receiver<SchedulerMessage>,
}

impl Control {
    /// Publish `state` and block for the engine's next command. Returns
    /// `None` if the engine has torn down the run (its ends of the channels
    /// were dropped).
    fn suspend(&self, state: ThreadState) -> Option<SchedulerMessage> {
        if self.to_engine.send(ThreadEvent::Suspend(state)).is_err() {
            return None;
        }
        self.from_engine.recv().ok()
    }
}

std::thread_local! {
    /// The scheduling handle of the simulated thread running on this OS
    /// thread, if any. Set once at thread start by [`spawn_thread`], read by
    /// every call to [`cond_schedule`], [`schedule`], or [`finish`].
    static CONTROL: RefCell<Option<Control>> = const { RefCell::new(None) };
}

/// The fundamental scheduling primitive. Suspends the calling thread at a
/// sequencing point, publishing [`ThreadState::Yield`]; on every subsequent
/// `Poll` from the engine, evaluates `is_runnable` and republishes
/// [`ThreadState::Ready`] or [`ThreadState::Block`]; returns once the engine
/// grants `Cont`.
///
/// `is_runnable` is re-evaluated on every poll, never memoized, and must be
/// a pure observation of shared state: side effects here would run at a
/// time the engine does not consider a step.
///
/// # Panics
///
/// Panics if called from an OS thread that is not currently running a
/// simulated thread spawned by [`crate::Engine`].
pub fn cond_schedule(mut is_runnable: impl FnMut() -> bool) {
    CONTROL.with(|cell| {
        let borrow = cell.borrow();
        let ctl = borrow
            .as_ref()
            .expect("cond_schedule() called outside of a simulated thread");
        let mut msg = ctl.suspend(ThreadState::Yield);
        loop {
            match msg {
                Some(SchedulerMessage::Cont) => return,
                Some(SchedulerMessage::Poll) => {
                    let ready = is_runnable();
                    msg = ctl.suspend(if ready {
                        ThreadState::Ready
                    } else {
                        ThreadState::Block
                    });
                }
                None => std::panic::panic_any(TornDown),
            }
        }
    })
}

/// Equivalent to `cond_schedule(|| true)`. Offers a context switch without
/// claiming to be unrunnable.
pub fn schedule() {
    cond_schedule(|| true)
}

/// Requests permanent termination of the calling simulated thread. Suspends
/// publishing [`ThreadState::Yield`], then on every subsequent poll
/// publishes [`ThreadState::Final`] (sticky, so the thread is never
/// scheduled again).
///
/// Never returns: either the engine keeps polling forever (impossible, since
/// a run terminates once every thread is `Final`) or tears the run down,
/// which unwinds this thread's stack instead.
///
/// # Panics
///
/// Panics if called from an OS thread that is not currently running a
/// simulated thread, or if the engine ever delivers `Cont` to an already
/// finished thread (a scheduling contract violation).
pub fn finish() -> ! {
    CONTROL.with(|cell| {
        let borrow = cell.borrow();
        let ctl = borrow
            .as_ref()
            .expect("finish() called outside of a simulated thread");
        let mut msg = ctl.suspend(ThreadState::Yield);
        loop {
            msg = match msg {
                Some(SchedulerMessage::Poll) => ctl.suspend(ThreadState::Final),
                Some(SchedulerMessage::Cont) => {
                    panic!("engine delivered `Cont` to a thread that had already called finish()")
                }
                None => std::panic::panic_any(TornDown),
            };
        }
    })
}

/// A freshly constructed, not-yet-running thread body. Called with no
/// arguments by the engine once per run; reads and mutates shared state it
/// closed over, and suspends only via [`cond_schedule`]/[`schedule`]/
/// [`finish`].
pub type ThreadBody = Box<dyn FnOnce() -> Result<(), SimError> + Send>;

/// A nullary factory producing a fresh, independent [`ThreadBody`] each time
/// it is called. The engine calls each constructor once per run.
pub type ThreadConstructor = Box<dyn Fn() -> ThreadBody + Send + Sync>;

/// The engine-side half of a spawned thread's channel pair.
pub(crate) struct EngineHandle {
    to_thread: crossbeam::channel::Sender<SchedulerMessage>,
    from_thread: crossbeam::channel::Receiver<ThreadEvent>,
}

impl EngineHandle {
    /// Blocks for the thread's very first suspension, without sending it
    /// anything first. A freshly spawned thread's leading `schedule()`
    /// sends its initial `Yield` unprompted; the engine must receive it
    /// before it has any command to send.
    pub(crate) fn first_suspend(&self) -> Option<ThreadEvent> {
        self.from_thread.recv().ok()
    }

    /// Sends `msg` and blocks for the thread's reply. Returns `None` if the
    /// thread has already exited (its end of the channel was dropped); this
    /// should only happen after the engine itself has torn the thread down.
    pub(crate) fn send(&self, msg: SchedulerMessage) -> Option<ThreadEvent> {
        if self.to_thread.send(msg).is_err() {
            return None;
        }
        self.from_thread.recv().ok()
    }
}

/// Spawns `body` on a fresh OS thread, wrapped between a leading
/// [`schedule()`] (so threads need no start-up self-synchronization) and a
/// trailing [`finish()`] (so normal termination needs no sentinel
/// exception). Drives it to its first suspension and returns once that
/// first `Yield` has been observed by the caller via the returned handle
/// (the caller still owns the receive).
pub(crate) fn spawn_thread(body: ThreadBody) -> (EngineHandle, std::thread::JoinHandle<()>) {
    let (to_thread_tx, to_thread_rx) = crossbeam::channel::bounded::<SchedulerMessage>(0);
    let (to_engine_tx, to_engine_rx) = crossbeam::channel::bounded::<ThreadEvent>(0);

    let ctl = Control {
        to_engine: to_engine_tx,
        from_engine: to_thread_rx,
    };

    let join = std::thread::Builder::new()
        .name("simsched-thread".to_string())
        .spawn(move || {
            CONTROL.with(|cell| *cell.borrow_mut() = Some(ctl));

            schedule();

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
            match result {
                Ok(Ok(())) => finish(),
                Ok(Err(e)) => report_panic(e),
                Err(payload) => {
                    if payload.downcast_ref::<TornDown>().is_some() {
                        return;
                    }
                    report_panic(SimError::from_panic_payload(payload));
                }
            }
        })
        .expect("failed to spawn a simulated thread");

    (
        EngineHandle {
            to_thread: to_thread_tx,
            from_thread: to_engine_rx,
        },
        join,
    )
}

fn report_panic(e: SimError) {
    CONTROL.with(|cell| {
        let borrow = cell.borrow();
        if let Some(ctl) = borrow.as_ref() {
            let _ = ctl.to_engine.send(ThreadEvent::Panicked(e));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Sends a command and asserts the expected reply. Good enough to
    /// validate the primitive in isolation, without the engine's scheduling
    /// policy.
    fn drive(handle: &EngineHandle, msg: SchedulerMessage) -> ThreadEvent {
        handle.send(msg).expect("thread should still be alive")
    }

    #[test]
    fn schedule_is_cond_schedule_true() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);

        let (handle, join) = spawn_thread(Box::new(move || {
            schedule();
            ran2.store(true, Ordering::SeqCst);
            Ok(())
        }));

        // leading schedule()'s initial Yield, sent unprompted.
        assert!(matches!(
            handle.first_suspend(),
            Some(ThreadEvent::Suspend(ThreadState::Yield))
        ));
        assert!(matches!(
            drive(&handle, SchedulerMessage::Poll),
            ThreadEvent::Suspend(ThreadState::Ready)
        ));
        // granting Cont lets the leading schedule() return; the body runs
        // until its own schedule() suspends with Yield.
        assert!(matches!(
            drive(&handle, SchedulerMessage::Cont),
            ThreadEvent::Suspend(ThreadState::Yield)
        ));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(matches!(
            drive(&handle, SchedulerMessage::Poll),
            ThreadEvent::Suspend(ThreadState::Ready)
        ));
        // granting Cont here runs the rest of the body (sets the flag) and
        // then the trailing finish(), which suspends with Yield.
        assert!(matches!(
            drive(&handle, SchedulerMessage::Cont),
            ThreadEvent::Suspend(ThreadState::Yield)
        ));
        assert!(ran.load(Ordering::SeqCst));
        assert!(matches!(
            drive(&handle, SchedulerMessage::Poll),
            ThreadEvent::Suspend(ThreadState::Final)
        ));

        drop(handle);
        join.join().unwrap();
    }

    #[test]
    fn finish_is_sticky() {
        let (handle, join) = spawn_thread(Box::new(|| Ok(())));

        handle.first_suspend(); // leading schedule()'s Yield
        drive(&handle, SchedulerMessage::Poll); // -> Ready
        drive(&handle, SchedulerMessage::Cont); // runs straight to finish()'s Yield
        for _ in 0..5 {
            assert!(matches!(
                drive(&handle, SchedulerMessage::Poll),
                ThreadEvent::Suspend(ThreadState::Final)
            ));
        }

        drop(handle);
        join.join().unwrap();
    }

    #[test]
    fn cond_schedule_blocks_until_predicate_true() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = Arc::clone(&flag);

        let (handle, join) = spawn_thread(Box::new(move || {
            cond_schedule(|| flag2.load(Ordering::SeqCst));
            Ok(())
        }));

        handle.first_suspend();
        drive(&handle, SchedulerMessage::Poll);
        drive(&handle, SchedulerMessage::Cont); // body's cond_schedule -> Yield

        assert!(matches!(
            drive(&handle, SchedulerMessage::Poll),
            ThreadEvent::Suspend(ThreadState::Block)
        ));
        assert!(matches!(
            drive(&handle, SchedulerMessage::Poll),
            ThreadEvent::Suspend(ThreadState::Block)
        ));

        flag.store(true, Ordering::SeqCst);
        assert!(matches!(
            drive(&handle, SchedulerMessage::Poll),
            ThreadEvent::Suspend(ThreadState::Ready)
        ));

        drop(handle);
        join.join().unwrap();
    }

    #[test]
    fn step_error_is_reported() {
        let (handle, join) = spawn_thread(Box::new(|| Err(SimError::new("testmsg"))));

        handle.first_suspend();
        drive(&handle, SchedulerMessage::Poll);
        match drive(&handle, SchedulerMessage::Cont) {
            ThreadEvent::Panicked(e) => assert_eq!(e.message, "testmsg"),
            other => panic!("expected Panicked, got {other:?}"),
        }

        drop(handle);
        join.join().unwrap();
    }

    #[test]
    fn dropping_engine_handle_unwinds_a_blocked_thread() {
        let (handle, join) = spawn_thread(Box::new(|| {
            cond_schedule(|| false);
            Ok(())
        }));

        handle.first_suspend();
        drive(&handle, SchedulerMessage::Poll);
        drive(&handle, SchedulerMessage::Cont);
        assert!(matches!(
            drive(&handle, SchedulerMessage::Poll),
            ThreadEvent::Suspend(ThreadState::Block)
        ));

        drop(handle);
        // the thread was blocked waiting on a recv(); dropping its sender
        // should wake it with a disconnect, which unwinds it cleanly.
        join.join().unwrap();
    }
}
