//! Really simple logger
//!
//! Both sides of the sandbox write to the same stderr, so each line
//! carries the PID of the process which emitted it.
use log::{self, LevelFilter, Log, SetLoggerError};
use std::str::FromStr;

struct Logger;

impl Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true // log::set_max_level() is sufficient
    }

    fn log(&self, record: &log::Record) {
        let lvl = record.level().to_string();
        let tgt = if record.target().is_empty() {
            record.module_path().unwrap_or_default()
        } else {
            record.target()
        };
        let pid = std::process::id();

        eprintln!("{lvl:<5} [{pid}] [{tgt}] {}", record.args());
    }

    fn flush(&self) {}
}

fn level_from(var: Option<&str>) -> LevelFilter {
    var.map(LevelFilter::from_str)
        .and_then(Result::ok)
        .unwrap_or(LevelFilter::Warn)
}

/// Install as the global logger.  Level from `$RUST_LOG`, default "warn".
pub fn setup() -> Result<(), SetLoggerError> {
    let lvl = level_from(std::env::var("RUST_LOG").ok().as_deref());

    log::set_max_level(lvl);
    log::set_logger(&Logger {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(level_from(None), LevelFilter::Warn);
        assert_eq!(level_from(Some("debug")), LevelFilter::Debug);
        assert_eq!(level_from(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(level_from(Some("nonsense")), LevelFilter::Warn);
    }
}
