//! Bridges the `log` facade to [`crate::host::HostServices::debug_print`]
//! (SPEC_FULL §A "Logging"). The core calls `trace!/debug!/info!/warn!/error!`
//! like any other `log` consumer; this module is the one place that turns a
//! `log::Record` into a call through the host boundary, since the core
//! itself never owns a logger, a console, or an allocator.

use core::fmt::Write;
use core::sync::atomic::{AtomicUsize, Ordering};

use heapless::consts::U256;
use heapless::String;
use log::{Level, Log, Metadata, Record, SetLoggerError};

use crate::host::LogLevel;

/// Function pointer the port driver hands us at startup, not a closure —
/// the sink is global `'static` state, same constraint as
/// `HostServices::register_timer`'s callback.
pub type SinkFn = fn(LogLevel, &str);

static SINK: AtomicUsize = AtomicUsize::new(0);

struct HostLogger;

static LOGGER: HostLogger = HostLogger;

fn to_host_level(level: Level) -> LogLevel {
    match level {
        Level::Error => LogLevel::Error,
        Level::Warn => LogLevel::Warn,
        Level::Info => LogLevel::Info,
        Level::Debug => LogLevel::Debug,
        Level::Trace => LogLevel::Trace,
    }
}

impl Log for HostLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        SINK.load(Ordering::Relaxed) != 0
    }

    fn log(&self, record: &Record) {
        let ptr = SINK.load(Ordering::Relaxed);
        if ptr == 0 {
            return;
        }
        // SAFETY: only ever stored by `install`, as a `SinkFn`.
        let sink: SinkFn = unsafe { core::mem::transmute(ptr) };
        let mut line: String<U256> = String::new();
        if write!(line, "{}", record.args()).is_ok() {
            sink(to_host_level(record.level()), line.as_str());
        }
    }

    fn flush(&self) {}
}

/// Installs the global log sink. The port driver calls this once, before
/// building its first [`crate::ControllerContext`]; a second call just
/// replaces which function future records are forwarded to.
pub fn install(sink: SinkFn) -> Result<(), SetLoggerError> {
    SINK.store(sink as usize, Ordering::Relaxed);
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU8, Ordering as O};

    static LAST_LEVEL: AtomicU8 = AtomicU8::new(0xFF);

    fn capture(level: LogLevel, _msg: &str) {
        LAST_LEVEL.store(level as u8, O::Relaxed);
    }

    #[test]
    fn disabled_sink_drops_records_silently() {
        SINK.store(0, Ordering::Relaxed);
        assert!(!LOGGER.enabled(&Metadata::builder().level(Level::Info).target("x").build()));
    }

    #[test]
    fn installed_sink_receives_forwarded_level() {
        SINK.store(capture as usize, Ordering::Relaxed);
        assert!(LOGGER.enabled(&Metadata::builder().level(Level::Warn).target("x").build()));
    }
}
