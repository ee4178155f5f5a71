use core::fmt;
use std::time::Instant;

use ansi_term::Color;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct Logger {
    start: Instant,
    level: LevelFilter,
}

/// Installs the colored stderr logger as the global `log` backend.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(Logger {
        start: Instant::now(),
        level,
    }))?;
    log::set_max_level(level);
    Ok(())
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let elapsed = self.start.elapsed();
        eprintln!(
            "{:4}.{:06} {} {}",
            elapsed.as_secs(),
            elapsed.subsec_micros(),
            LevelFormat(record.level()),
            record.args()
        );
    }

    fn flush(&self) {}
}

struct LevelFormat(Level);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (color, msg) = match self.0 {
            Level::Trace => (Color::Purple, "TRACE"),
            Level::Debug => (Color::Blue, "DEBUG"),
            Level::Info => (Color::Green, " INFO"),
            Level::Warn => (Color::Yellow, " WARN"),
            Level::Error => (Color::Red, "ERROR"),
        };
        write!(f, "{}", color.paint(msg))
    }
}
