//! Lightweight structured logging.
//!
//! Logging is off by default and enabled via environment variables, so the
//! library stays silent unless asked:
//!
//! - `SMARTDB_LOG=1` enables output (to stderr)
//! - `SMARTDB_LOG_LEVEL=trace|debug|info|warn|error` sets the minimum level
//!
//! Error events are emitted as one-line JSON objects carrying the error
//! kind, code, retryability and message, plus the current operation context
//! when one is installed via [`OperationScope`].

use crate::error::Error;
use std::cell::RefCell;
use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};

/// Log levels, most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    /// No logging.
    Off = 5,
}

impl LogLevel {
    /// Parse a level name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "off" | "none" => Some(Self::Off),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Off => "OFF",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            _ => Self::Off,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(false);
static MIN_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INIT: Once = Once::new();

fn init_from_env() {
    INIT.call_once(|| {
        if let Ok(v) = env::var("SMARTDB_LOG") {
            let enabled = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
            LOGGING_ENABLED.store(enabled, Ordering::Relaxed);
        }
        if let Ok(v) = env::var("SMARTDB_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&v) {
                MIN_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
            }
        }
    });
}

/// Force-enable or disable logging, overriding the environment.
pub fn set_logging_enabled(enabled: bool) {
    init_from_env();
    LOGGING_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Set the minimum level emitted.
pub fn set_min_log_level(level: LogLevel) {
    init_from_env();
    MIN_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Current minimum level.
pub fn min_log_level() -> LogLevel {
    init_from_env();
    LogLevel::from_u8(MIN_LOG_LEVEL.load(Ordering::Relaxed))
}

/// Whether a message at `level` would be emitted.
pub fn log_enabled(level: LogLevel) -> bool {
    init_from_env();
    LOGGING_ENABLED.load(Ordering::Relaxed) && level >= min_log_level() && level != LogLevel::Off
}

/// Emit a message. Prefer the `log_*!` macros.
pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if log_enabled(level) {
        eprintln!("[smartdb {}] {}", level, args);
    }
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Trace, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Error, format_args!($($arg)*))
    };
}

/// Correlation data for a logical operation, propagated to log events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub trace_id: String,
    pub operation: String,
}

static TRACE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a fresh trace id from wall-clock micros and a process-wide sequence.
pub fn make_trace_id() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    let seq = TRACE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", micros, seq)
}

/// A new context with a fresh trace id.
pub fn make_operation_context(operation: impl Into<String>) -> OperationContext {
    OperationContext {
        trace_id: make_trace_id(),
        operation: operation.into(),
    }
}

/// A child context sharing the parent's trace id.
pub fn child_operation_context(
    parent: &OperationContext,
    operation: impl Into<String>,
) -> OperationContext {
    OperationContext {
        trace_id: parent.trace_id.clone(),
        operation: operation.into(),
    }
}

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<OperationContext>> = const { RefCell::new(None) };
}

/// The context installed on this thread, if any.
pub fn current_operation_context() -> Option<OperationContext> {
    CURRENT_CONTEXT.with(|slot| slot.borrow().clone())
}

/// Installs an operation context for the current thread until dropped,
/// restoring whatever was installed before.
pub struct OperationScope {
    previous: Option<OperationContext>,
}

impl OperationScope {
    pub fn new(ctx: OperationContext) -> Self {
        let previous = CURRENT_CONTEXT.with(|slot| slot.borrow_mut().replace(ctx));
        Self { previous }
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_CONTEXT.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Render an error as a structured one-line JSON event.
pub fn structured_error(event: &str, err: &Error) -> String {
    let mut payload = serde_json::json!({
        "event": event,
        "kind": err.kind().as_str(),
        "retryable": err.is_retryable(),
        "code": err.code(),
        "message": err.message(),
    });
    if let Some(ctx) = current_operation_context() {
        payload["trace_id"] = serde_json::Value::String(ctx.trace_id);
        payload["operation"] = serde_json::Value::String(ctx.operation);
    }
    payload.to_string()
}

/// Emit a structured error event at the given level.
pub fn log_db_error(level: LogLevel, event: &str, err: &Error) {
    if log_enabled(level) {
        log(level, format_args!("{}", structured_error(event, err)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[test]
    fn test_trace_ids_are_unique() {
        let a = make_trace_id();
        let b = make_trace_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_operation_scope_nesting() {
        assert_eq!(current_operation_context(), None);

        let outer = make_operation_context("outer");
        let _outer_scope = OperationScope::new(outer.clone());
        assert_eq!(
            current_operation_context().map(|c| c.operation),
            Some("outer".to_string())
        );

        {
            let inner = child_operation_context(&outer, "inner");
            assert_eq!(inner.trace_id, outer.trace_id);
            let _inner_scope = OperationScope::new(inner);
            assert_eq!(
                current_operation_context().map(|c| c.operation),
                Some("inner".to_string())
            );
        }

        assert_eq!(
            current_operation_context().map(|c| c.operation),
            Some("outer".to_string())
        );
    }

    #[test]
    fn test_structured_error_shape() {
        let err = Error::not_found("Connection config not found: demo");
        let rendered = structured_error("db_manager_create_connection", &err);
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["event"], "db_manager_create_connection");
        assert_eq!(parsed["kind"], "NotFound");
        assert_eq!(parsed["retryable"], false);
        assert_eq!(parsed["code"], 0);
        assert_eq!(parsed["message"], "Connection config not found: demo");
    }

    #[test]
    fn test_structured_error_includes_context() {
        let ctx = make_operation_context("load");
        let trace_id = ctx.trace_id.clone();
        let _scope = OperationScope::new(ctx);

        let err = Error::configuration("bad file");
        let parsed: serde_json::Value =
            serde_json::from_str(&structured_error("db_manager_load_config", &err)).unwrap();
        assert_eq!(parsed["trace_id"], trace_id.as_str());
        assert_eq!(parsed["operation"], "load");
    }
}
