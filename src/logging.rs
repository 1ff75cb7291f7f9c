//! Logging port
//!
//! Library components never reach for a process-wide logger. They are handed
//! an `Arc<dyn LogSink>` at construction; the outermost assembly (the CLI, or
//! an embedding application) decides where the records go.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Destination for structured log events
pub trait LogSink: Send + Sync {
    /// Record one event
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn LogSink>;

/// Forwards every record to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Create a shared tracing sink
    pub fn shared() -> SharedSink {
        Arc::new(TracingSink)
    }
}

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "publicast", "{}", message),
            LogLevel::Info => tracing::info!(target: "publicast", "{}", message),
            LogLevel::Warning => tracing::warn!(target: "publicast", "{}", message),
            LogLevel::Error => tracing::error!(target: "publicast", "{}", message),
        }
    }
}

/// Keeps records in memory, in emission order
///
/// Useful for tests and for hosts that render their own log panel.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records captured so far
    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Records at exactly `level`
    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    /// True if any record contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|(_, m)| m.contains(needle))
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str) {
        // A poisoned lock only means another thread panicked mid-push.
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push((level, message.to_string()));
    }
}
