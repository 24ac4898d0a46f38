//! Operator console logger for calibration runs.
//!
//! Lines are written to stderr as `[elapsed LEVEL module] message`, where
//! `module` is the last path segment of the record target. Records from
//! outside the `deckcal` crates are capped at `warn` so dependency chatter
//! does not bury jog and save messages. A run can also be mirrored into an
//! append-only log file, which is what gets attached to a calibration
//! record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_TARGET: &str = "deckcal";

#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SetLogger(#[from] log::SetLoggerError),
}

struct ConsoleLogger {
    level: LevelFilter,
    started: Instant,
    mirror: Option<Mutex<File>>,
}

fn is_own_target(target: &str) -> bool {
    target
        .split("::")
        .next()
        .is_some_and(|krate| krate.starts_with(OWN_TARGET))
}

fn short_target(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

fn format_line(elapsed: f64, level: Level, target: &str, message: &std::fmt::Arguments) -> String {
    format!(
        "[{:8.3}s {:>5} {}] {}",
        elapsed,
        level,
        short_target(target),
        message
    )
}

impl ConsoleLogger {
    fn allows(&self, level: Level, target: &str) -> bool {
        let ceiling = if is_own_target(target) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        };
        level <= ceiling
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.allows(metadata.level(), metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args(),
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
        if let Some(file) = &self.mirror {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
        if let Some(file) = &self.mirror {
            let _ = file.lock().unwrap_or_else(PoisonError::into_inner).flush();
        }
    }
}

static LOGGER: OnceLock<ConsoleLogger> = OnceLock::new();

fn install(logger: ConsoleLogger) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let level = logger.level;
        let logger = LOGGER.get_or_init(|| logger);
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install the console logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    install(ConsoleLogger {
        level,
        started: Instant::now(),
        mirror: None,
    })
}

/// Like [`init_with_level`], and additionally append every line to `path`.
pub fn init_with_file(level: LevelFilter, path: impl AsRef<Path>) -> Result<(), LoggerError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    install(ConsoleLogger {
        level,
        started: Instant::now(),
        mirror: Some(Mutex::new(file)),
    })?;
    Ok(())
}

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Span close events are emitted so session commands report their duration.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .with_target(true)
            .finish()
            .try_init();
    }
}
