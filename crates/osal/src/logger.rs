//! Console sink for the `log` facade.
//!
//! Lines look like `2026-10-19 08:15:02:117 I msglooper::looper: started`:
//! local wall-clock time with milliseconds, a one-letter level, the record
//! target used as the tag, then the message.

use std::fmt;
use std::io::{self, Write};

use chrono::{DateTime, Local, TimeZone};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::OsalError;

/// Logger writing formatted lines to stdout.
#[derive(Debug)]
pub struct ConsoleLogger {
    level: LevelFilter,
}

impl ConsoleLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self { level }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(&Local::now(), record.level(), record.target(), record.args());
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Installs a [`ConsoleLogger`] as the global logger.
pub fn init(level: LevelFilter) -> Result<(), OsalError> {
    log::set_boxed_logger(Box::new(ConsoleLogger::new(level)))
        .map_err(|_| OsalError::LoggerInstalled)?;
    log::set_max_level(level);
    Ok(())
}

/// One-letter tag for a level.
pub fn level_letter(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'V',
    }
}

pub fn format_line<Tz>(timestamp: &DateTime<Tz>, level: Level, tag: &str, args: &fmt::Arguments<'_>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!(
        "{} {} {}: {}",
        timestamp.format("%Y-%m-%d %H:%M:%S:%3f"),
        level_letter(level),
        tag,
        args
    )
}
