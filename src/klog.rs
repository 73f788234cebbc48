//! Console logging.
//!
//! Grounded on `crates/eonix_log/src/lib.rs`: a pluggable sink behind a
//! lock, with a small family of `println_*!`-style macros layered on top.
//! This crate calls the macros `kprintln!`/`kdebug!`/etc. to avoid
//! colliding with `std::println!`, but the shape is unchanged.

use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Fatal,
}

pub trait LogSink: Send + Sync {
    fn write_line(&self, level: LogLevel, line: &str);
}

/// Sink that records every line, for tests to assert against.
pub struct RecordingSink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for RecordingSink {
    fn write_line(&self, level: LogLevel, line: &str) {
        self.lines.lock().push((level, line.to_string()));
    }
}

/// Sink that writes to standard output, the default outside of tests.
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, level: LogLevel, line: &str) {
        let tag = match level {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Fatal => "fatal",
        };
        println!("[kernel:{tag}] {line}");
    }
}

lazy_static::lazy_static! {
    static ref CONSOLE: Mutex<std::sync::Arc<dyn LogSink>> =
        Mutex::new(std::sync::Arc::new(StdoutSink));
}

pub fn set_sink(sink: std::sync::Arc<dyn LogSink>) {
    *CONSOLE.lock() = sink;
}

#[doc(hidden)]
pub fn do_log(level: LogLevel, args: std::fmt::Arguments) {
    CONSOLE.lock().write_line(level, &args.to_string());
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        #[cfg(debug_assertions)]
        $crate::klog::do_log($crate::klog::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kprintln {
    ($($arg:tt)*) => {
        $crate::klog::do_log($crate::klog::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::klog::do_log($crate::klog::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {
        $crate::klog::do_log($crate::klog::LogLevel::Fatal, format_args!($($arg)*))
    };
}
