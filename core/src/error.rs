//! The error payload carried by [`crate::RunResult::Panic`], and the small
//! set of contract-violation assertions the engine itself raises.

use std::any::Any;

/// A user-visible error raised by a simulated thread's step, or recovered
/// from a Rust panic unwound out of one.
///
/// This is deliberately a leaf type: it carries only a message, not a
/// backtrace or a source chain, because the whole point of a `Panic` run
/// outcome is that the run is over and the message is what callers compare
/// against to identify which failure occurred.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SimError {
    pub message: String,
}

impl SimError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Recovers a [`SimError`] from a panic payload caught at a thread's
    /// top-level wrapper via [`std::panic::catch_unwind`].
    pub fn from_panic_payload(payload: Box<dyn Any + Send>) -> Self {
        if let Some(s) = payload.downcast_ref::<&str>() {
            Self::new(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Self::new(s.clone())
        } else {
            Self::new("thread panicked with a non-string payload")
        }
    }
}
