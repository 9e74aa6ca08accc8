//! Structured Logging with Sensitive Data Redaction
//!
//! Every engine module logs through the `log_*!` macros below. Field values
//! are redacted by key name:
//! - mnemonics, seeds, WIFs and private keys are fully hidden
//! - addresses and txids keep a short prefix/suffix
//! - raw transaction hex is truncated to its length

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Minimum level that is written, stored as `LogLevel as u8`
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Set the minimum level that reaches stderr
pub fn set_min_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn min_level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst))
}

/// Apply `METAID_LOG` (debug/info/warn/error) if present
pub fn init_from_env() {
    if let Ok(value) = std::env::var("METAID_LOG") {
        if let Some(level) = LogLevel::parse(&value) {
            set_min_level(level);
        }
    }
}

/// Structured log entry
#[derive(Debug)]
pub struct LogEntry {
    pub level: LogLevel,
    pub module: &'static str,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
}

impl LogEntry {
    pub fn new(level: LogLevel, module: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            module,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field to the log entry (auto-redacts sensitive data)
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        let value_str = value.to_string();
        let redacted = redact_if_sensitive(key, &value_str);
        self.fields.push((key, redacted));
        self
    }

    /// Render the line without the timestamp
    pub fn render(&self) -> String {
        let fields_str = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");

        if fields_str.is_empty() {
            format!("{} [{}] {}", self.level, self.module, self.message)
        } else {
            format!("{} [{}] {} | {}", self.level, self.module, self.message, fields_str)
        }
    }

    /// Log the entry
    pub fn log(self) {
        if self.level < min_level() {
            return;
        }
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        eprintln!("[{}] {}", timestamp, self.render());
    }
}

/// Redact a value if the key suggests it's sensitive
fn redact_if_sensitive(key: &str, value: &str) -> String {
    let key_lower = key.to_lowercase();

    let fully_redacted_keys = [
        "mnemonic", "seed", "private", "secret", "wif", "passphrase", "password",
    ];
    if fully_redacted_keys.iter().any(|k| key_lower.contains(k)) {
        return redact_value(value);
    }

    if key_lower.contains("raw") || key_lower.ends_with("hex") {
        return format!("[HEX:{}bytes]", value.len() / 2);
    }

    let address_keys = ["address", "receiver", "destination"];
    if address_keys.iter().any(|k| key_lower.contains(k)) {
        return redact_middle(value, 6, 4);
    }

    if key_lower.contains("txid") || key_lower.contains("outpoint") {
        return redact_middle(value, 10, 6);
    }

    value.to_string()
}

/// Fully redact a sensitive value
fn redact_value(value: &str) -> String {
    if value.is_empty() {
        return "[EMPTY]".to_string();
    }
    if value.len() <= 4 {
        "[REDACTED]".to_string()
    } else {
        format!("[REDACTED:{}chars]", value.len())
    }
}

/// Keep `prefix` leading and `suffix` trailing characters
fn redact_middle(value: &str, prefix: usize, suffix: usize) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "[EMPTY]".to_string();
    }
    if !trimmed.is_ascii() || trimmed.len() <= prefix + suffix + 3 {
        return trimmed.to_string();
    }
    format!(
        "{}...{}",
        &trimmed[..prefix],
        &trimmed[trimmed.len() - suffix..]
    )
}

/// Shared body of the `log_*!` macros
#[doc(hidden)]
#[macro_export]
macro_rules! __metaid_log {
    ($level:ident, $module:expr, $msg:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::utils::logging::LogEntry::new($crate::utils::logging::LogLevel::$level, $module, $msg)
            $(.field(stringify!($key), &$value))*
            .log()
    };
}

/// `log_debug!(module, message, key = value, ...)`
#[macro_export]
macro_rules! log_debug {
    ($($args:tt)*) => { $crate::__metaid_log!(Debug, $($args)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($args:tt)*) => { $crate::__metaid_log!(Info, $($args)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($args:tt)*) => { $crate::__metaid_log!(Warn, $($args)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($args:tt)*) => { $crate::__metaid_log!(Error, $($args)*) };
}
