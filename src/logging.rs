//! Operator Logging
//!
//! The server core reports operational events through an injected
//! [`OperatorLog`] so an embedding console can display them without the core
//! knowing anything about its UI.

use std::sync::Mutex;

/// Sink for operator-visible log lines
pub trait OperatorLog: Send + Sync {
    /// Record one log line
    fn log(&self, line: &str);
}

/// Operator log that forwards every line to `tracing`
#[derive(Debug, Default)]
pub struct TracingLog;

impl OperatorLog for TracingLog {
    fn log(&self, line: &str) {
        tracing::info!(target: "filehub::operator", "{}", line);
    }
}

/// Operator log that retains lines in memory for later display
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    /// Create an empty in-memory log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded lines in arrival order
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("operator log poisoned").clone()
    }
}

impl OperatorLog for MemoryLog {
    fn log(&self, line: &str) {
        tracing::info!(target: "filehub::operator", "{}", line);
        self.lines
            .lock()
            .expect("operator log poisoned")
            .push(line.to_string());
    }
}
