use crate::common::types::LogLevel;

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

/// A log record as handed to a callback sink.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub level: LogLevel,
    pub target: &'a str,
    pub message: &'a str,
    pub file: &'a str,
    pub line: u32,
}

pub type LogCallback = Box<dyn Fn(&LogRecord<'_>) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[error("another logger is already installed for the `log` facade")]
pub struct LogInstallError;

const MODE_DISABLED: u8 = 0;
const MODE_STDERR: u8 = 1;
const MODE_CALLBACK: u8 = 2;

pub struct EntryLogger {
    mode: AtomicU8,
    level: AtomicU8,
    callback: Mutex<Option<LogCallback>>,
}

impl EntryLogger {
    const fn new() -> Self {
        Self {
            mode: AtomicU8::new(MODE_DISABLED),
            level: AtomicU8::new(LogLevel::Off as u8),
            callback: Mutex::new(None),
        }
    }

    fn level(&self) -> Option<Level> {
        level_from_u8(self.level.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
        log::set_max_level(level_filter(level));
    }

    fn set_mode(&self, mode: u8) {
        self.mode.store(mode, Ordering::Relaxed);
    }

    fn set_callback(&self, callback: Option<LogCallback>) {
        if let Ok(mut state) = self.callback.lock() {
            *state = callback;
        }
    }
}

impl Log for EntryLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let Some(level) = self.level() else {
            return false;
        };
        metadata.level() <= level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match self.mode.load(Ordering::Relaxed) {
            MODE_STDERR => {
                eprintln!("[entryfs][{}] {}", record.level(), record.args());
            }
            MODE_CALLBACK => {
                let Ok(state) = self.callback.lock() else {
                    return;
                };
                let Some(callback) = state.as_ref() else {
                    return;
                };
                let message = record.args().to_string();
                callback(&LogRecord {
                    level: level_from_log(record.level()),
                    target: record.target(),
                    message: &message,
                    file: record.file().unwrap_or(""),
                    line: record.line().unwrap_or(0),
                });
            }
            _ => {}
        }
    }

    fn flush(&self) {}
}

static LOGGER: EntryLogger = EntryLogger::new();
static LOGGER_STATE: OnceLock<LoggerInstall> = OnceLock::new();

#[derive(Copy, Clone)]
enum LoggerInstall {
    Installed,
    External,
}

fn init_logger() -> LoggerInstall {
    *LOGGER_STATE.get_or_init(|| match log::set_logger(&LOGGER) {
        Ok(()) => {
            log::set_max_level(LevelFilter::Off);
            LoggerInstall::Installed
        }
        Err(_) => LoggerInstall::External,
    })
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::Off,
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

fn level_from_u8(level: u8) -> Option<Level> {
    match level {
        x if x == LogLevel::Error as u8 => Some(Level::Error),
        x if x == LogLevel::Warn as u8 => Some(Level::Warn),
        x if x == LogLevel::Info as u8 => Some(Level::Info),
        x if x == LogLevel::Debug as u8 => Some(Level::Debug),
        x if x == LogLevel::Trace as u8 => Some(Level::Trace),
        _ => None,
    }
}

fn level_from_log(level: Level) -> LogLevel {
    match level {
        Level::Error => LogLevel::Error,
        Level::Warn => LogLevel::Warn,
        Level::Info => LogLevel::Info,
        Level::Debug => LogLevel::Debug,
        Level::Trace => LogLevel::Trace,
    }
}

/// Routes crate records to stderr at `level` and above.
pub fn log_set_stderr(level: LogLevel) -> Result<(), LogInstallError> {
    if matches!(init_logger(), LoggerInstall::External) {
        return Err(LogInstallError);
    }
    LOGGER.set_callback(None);
    LOGGER.set_mode(MODE_STDERR);
    LOGGER.set_level(level);
    Ok(())
}

/// Routes records to `callback`. The callback runs on the logging thread
/// while an internal lock is held, so it must not log through `log` itself.
pub fn log_set_callback<F>(callback: F, level: LogLevel) -> Result<(), LogInstallError>
where
    F: Fn(&LogRecord<'_>) + Send + Sync + 'static,
{
    if matches!(init_logger(), LoggerInstall::External) {
        return Err(LogInstallError);
    }
    LOGGER.set_callback(Some(Box::new(callback)));
    LOGGER.set_mode(MODE_CALLBACK);
    LOGGER.set_level(level);
    Ok(())
}

/// Adjusts the level. With an external logger installed this only moves the
/// facade's max level.
pub fn log_set_level(level: LogLevel) {
    match init_logger() {
        LoggerInstall::Installed => LOGGER.set_level(level),
        LoggerInstall::External => log::set_max_level(level_filter(level)),
    }
}

pub fn log_disable() {
    match init_logger() {
        LoggerInstall::Installed => {
            LOGGER.set_mode(MODE_DISABLED);
            LOGGER.set_level(LogLevel::Off);
            LOGGER.set_callback(None);
        }
        LoggerInstall::External => log::set_max_level(LevelFilter::Off),
    }
}
