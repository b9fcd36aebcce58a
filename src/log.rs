//! File logging.
//!
//! Lines go to `<project root>/.pipewright/pipewright.log`, or to the path in
//! `PIPEWRIGHT_LOG`. When the project directory cannot be written the log
//! falls back to `~/.pipewright/pipewright.log`. Messages scoped to a run
//! carry its short id:
//!
//! ```text
//! 14:02:11.532 DEBUG [3f2a9c1e] skipping 'webpack' (already ran)
//! 14:02:11.540 INFO  Watching src/**/*.scss -> [styles]
//! ```
//!
//! The level is INFO, DEBUG with `--debug` or `PIPEWRIGHT_DEBUG=1`, and
//! `PIPEWRIGHT_LOG_LEVEL=<error|warn|info|debug|trace>` overrides both.
//! Until [`init`] runs every macro is a no-op.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

/// Directory below the project root (or home) holding the log file.
pub const LOG_DIR: &str = ".pipewright";
pub const LOG_FILE: &str = "pipewright.log";

static LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static SINK: Mutex<Option<File>> = Mutex::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "warn" | "warning" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// What happens to an existing log file at [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Start from an empty file (one-shot commands).
    Truncate,
    /// Keep earlier lines (long-running `watch` sessions).
    Append,
}

/// Open the log for the project at `root`.
///
/// Returns the path in use, or `None` if no candidate could be opened (the
/// process then runs without a log).
pub fn init(root: &Path, debug: bool, mode: LogMode) -> Option<PathBuf> {
    set_level(level_from_env(debug));

    for path in candidate_paths(root) {
        match open(&path, mode) {
            Ok(file) => {
                if let Ok(mut sink) = SINK.lock() {
                    *sink = Some(file);
                }
                return Some(path);
            }
            Err(_) => continue,
        }
    }
    None
}

fn level_from_env(debug: bool) -> Level {
    if let Some(level) = std::env::var("PIPEWRIGHT_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        return level;
    }
    let env_debug = std::env::var("PIPEWRIGHT_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if debug || env_debug {
        Level::Debug
    } else {
        Level::Info
    }
}

/// Where the log may live, in order of preference.
fn candidate_paths(root: &Path) -> Vec<PathBuf> {
    if let Some(path) = std::env::var_os("PIPEWRIGHT_LOG").filter(|p| !p.is_empty()) {
        return vec![PathBuf::from(path)];
    }
    let mut paths = vec![root.join(LOG_DIR).join(LOG_FILE)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(LOG_DIR).join(LOG_FILE));
    }
    paths
}

fn open(path: &Path, mode: LogMode) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        LogMode::Truncate => options.write(true).truncate(true),
        LogMode::Append => options.append(true),
    };
    options.open(path)
}

pub fn level() -> Level {
    match LEVEL.load(Ordering::Relaxed) {
        0 => Level::Error,
        1 => Level::Warn,
        2 => Level::Info,
        3 => Level::Debug,
        _ => Level::Trace,
    }
}

pub fn set_level(level: Level) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level <= self::level()
}

/// Render one log line (without the trailing newline).
pub fn format_line(
    timestamp: &str,
    level: Level,
    context: Option<&dyn fmt::Display>,
    msg: fmt::Arguments<'_>,
) -> String {
    match context {
        Some(ctx) => format!("{} {:<5} [{}] {}", timestamp, level, ctx, msg),
        None => format!("{} {:<5} {}", timestamp, level, msg),
    }
}

/// Write a message if `level` is enabled. Use the `pwlog*` macros instead.
pub fn write(level: Level, context: Option<&dyn fmt::Display>, msg: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let Ok(mut sink) = SINK.lock() else {
        return;
    };
    if let Some(file) = sink.as_mut() {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        let _ = writeln!(file, "{}", format_line(&timestamp, level, context, msg));
    }
}

/// Log at INFO. `pwlog!(ctx => "fmt", args)` prefixes the line with `[ctx]`.
#[macro_export]
macro_rules! pwlog {
    ($ctx:expr => $($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Info, Some(&$ctx as &dyn ::std::fmt::Display), format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Info, None, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! pwlog_error {
    ($ctx:expr => $($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Error, Some(&$ctx as &dyn ::std::fmt::Display), format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Error, None, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! pwlog_warn {
    ($ctx:expr => $($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Warn, Some(&$ctx as &dyn ::std::fmt::Display), format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Warn, None, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! pwlog_debug {
    ($ctx:expr => $($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Debug, Some(&$ctx as &dyn ::std::fmt::Display), format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Debug, None, format_args!($($arg)+))
    };
}

/// Log at TRACE (raw file-system events, glob matching).
#[macro_export]
macro_rules! pwlog_trace {
    ($ctx:expr => $($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Trace, Some(&$ctx as &dyn ::std::fmt::Display), format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log::write($crate::log::Level::Trace, None, format_args!($($arg)+))
    };
}
