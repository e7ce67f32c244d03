use atomic_refcell::AtomicRefCell;
use simsched::{cond_schedule, schedule, SimError};

struct State<O> {
    locked: bool,
    owner: Option<O>,
}

/// A mutual-exclusion flag for simulated threads.
///
/// Guards only *logical* exclusion among simulated threads. It has no
/// effect on the engine's own scheduling, which already runs one step at a
/// time. [`AtomicRefCell`] is used purely so `Mutex` can be shared (via
/// `Arc`) across the OS threads each simulated thread is realized on; since
/// only one simulated thread ever runs at once, a borrow here is never
/// actually contended.
///
/// `O` is whatever token callers want to use to name a mutex's owner (a
/// thread index, a name, `()` if they don't care). Fairness is not
/// guaranteed: when multiple threads are blocked on the same mutex,
/// whichever one the engine's random scheduler happens to pick next
/// acquires it.
pub struct Mutex<O = ()> {
    label: Option<String>,
    state: AtomicRefCell<State<O>>,
}

impl<O: Clone> Mutex<O> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            state: AtomicRefCell::new(State {
                locked: false,
                owner: None,
            }),
        }
    }

    /// Constructs an unlabeled mutex, for callers that have no need to name
    /// it in diagnostics.
    pub fn unlabeled() -> Self {
        Self {
            label: None,
            state: AtomicRefCell::new(State {
                locked: false,
                owner: None,
            }),
        }
    }

    /// Blocks (yielding to other threads on every poll) until the mutex is
    /// free, then acquires it under the given owner token.
    pub fn lock(&self, owner: Option<O>) {
        cond_schedule(|| !self.state.borrow().locked);
        let mut state = self.state.borrow_mut();
        state.locked = true;
        state.owner = owner;
    }

    /// Releases the mutex, then offers a context switch so a waiter can
    /// take its turn next.
    ///
    /// # Errors
    ///
    /// Returns a [`SimError`] if the mutex was not held. Unlocking an
    /// unlocked mutex is a misuse of the primitive, not a scheduling
    /// contract violation, so it surfaces as a normal `Panic` run outcome
    /// rather than an assertion failure.
    pub fn unlock(&self) -> Result<(), SimError> {
        {
            let mut state = self.state.borrow_mut();
            if !state.locked {
                return Err(SimError::new(format!(
                    "unlock of unlocked mutex `{}`",
                    self.label.as_deref().unwrap_or("<unlabeled>")
                )));
            }
            state.locked = false;
            state.owner = None;
        }
        schedule();
        Ok(())
    }

    /// Current owner, if locked. For diagnostics and tests; does not
    /// suspend.
    pub fn owner(&self) -> Option<O> {
        self.state.borrow().owner.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.state.borrow().locked
    }
}
