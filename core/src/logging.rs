//! A crate-local [`log::Log`] implementation, installed once via [`init`].
//!
//! Bridges the `log` facade to stderr directly rather than to the
//! multi-threaded, queued sink the scheduler this crate is modeled on uses
//! for its own logger (this crate has no comparable volume of concurrent
//! log traffic to justify one). What it keeps from that design is the
//! pattern: a single static logger instance, a max level read from the
//! standard `RUST_LOG` environment convention, and a panic hook that
//! flushes before deferring to whatever hook was previously installed.

use std::io::Write;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::Lazy;

static SIM_LOGGER: Lazy<SimLogger> = Lazy::new(SimLogger::new);

/// Installs [`SimLogger`] as the global logger, honoring `RUST_LOG` for the
/// max level (defaulting to `info` if unset or unparseable), and chains a
/// panic hook that flushes stderr before running the previously installed
/// hook.
///
/// Idempotent in the sense that calling it more than once returns an `Err`
/// from the second call onward (per [`log::set_logger`]'s contract); callers
/// that may run in a shared process should ignore that error rather than
/// treat it as fatal.
pub fn init() -> Result<(), SetLoggerError> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    log::set_logger(&*SIM_LOGGER)?;
    log::set_max_level(level);

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = std::io::stderr().flush();
        previous(info);
    }));

    Ok(())
}

/// Writes formatted records directly to stderr, serialized behind a mutex
/// so concurrent simulated-thread panics don't interleave their lines.
struct SimLogger {
    sink: Mutex<()>,
}

impl SimLogger {
    fn new() -> Self {
        Self { sink: Mutex::new(()) }
    }
}

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let stream: &mut dyn Write = &mut std::io::stderr();
        let _ = writeln!(
            stream,
            "[{:<5} {}] {}",
            level_label(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}
