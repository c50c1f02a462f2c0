//! Purpose: Log sink seam used by the core for diagnostic and access logs.
//! Exports: `Severity`, `LogSink`, `TracingSink`, `MemorySink`, `LogEntry`, `init_tracing`.
//! Role: Constructor-injected collaborator; the core never looks up a global logger.
//! Invariants: Writing to a sink never fails from the caller's perspective.
//! Invariants: Structured context is a JSON object and is passed through untouched.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Debug,
    Notice,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, severity: Severity, message: &str, context: &Map<String, Value>);
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn log(&self, severity: Severity, message: &str, context: &Map<String, Value>) {
        (**self).log(severity, message, context);
    }
}

/// Forwards to `tracing`. Notice maps to INFO and critical to ERROR; the
/// original label is kept in the `severity` field.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, severity: Severity, message: &str, context: &Map<String, Value>) {
        let label = severity.as_str();
        let ctx = Value::Object(context.clone());
        match severity {
            Severity::Debug => tracing::debug!(severity = label, context = %ctx, "{message}"),
            Severity::Notice | Severity::Info => {
                tracing::info!(severity = label, context = %ctx, "{message}")
            }
            Severity::Warning => tracing::warn!(severity = label, context = %ctx, "{message}"),
            Severity::Error | Severity::Critical => {
                tracing::error!(severity = label, context = %ctx, "{message}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub context: Map<String, Value>,
}

/// Keeps every entry in memory; used by tests and embedding hosts.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn at(&self, severity: Severity) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.severity == severity)
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, severity: Severity, message: &str, context: &Map<String, Value>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                severity,
                message: message.to_string(),
                context: context.clone(),
            });
    }
}

/// Stderr subscriber filtered by `RUST_LOG` (default `info`). Stdout is
/// reserved for the response.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
