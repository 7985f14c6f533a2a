//! Log buffer
//!
//! Collects an execution's log entries in memory while its actions run. The
//! engine drains the buffer into the log repository after every run-order
//! partition and once more when the execution ends.

use conveyor_core::domain::log::{LogEntry, LogLevel};
use std::sync::{Arc, Mutex};

/// Thread-safe sink for execution log entries
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    fn add_entry(&self, entry: LogEntry);

    /// Returns all buffered entries and clears the buffer
    fn drain(&self) -> Vec<LogEntry>;
}

/// In-memory implementation of LogBufferService
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }
}

/// Log handle scoped to one `stage/action` (or to the execution itself)
#[derive(Clone)]
pub struct ActionLog {
    buffer: Arc<dyn LogBufferService>,
    source: Option<String>,
}

impl ActionLog {
    pub fn new(buffer: Arc<dyn LogBufferService>, source: Option<String>) -> Self {
        Self { buffer, source }
    }

    /// Same buffer, different source label
    pub fn scoped(&self, source: impl Into<String>) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            source: Some(source.into()),
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.push(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(LogLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&self, level: LogLevel, message: String) {
        self.buffer
            .add_entry(LogEntry::new(level, self.source.clone(), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = InMemoryLogBuffer::new();
        let log = ActionLog::new(Arc::new(buffer.clone()), None);

        log.info("starting");
        log.scoped("Build/Synth").error("boom");

        let entries = buffer.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, None);
        assert_eq!(entries[1].source.as_deref(), Some("Build/Synth"));
        assert_eq!(entries[1].level, LogLevel::Error);
        assert!(buffer.drain().is_empty());
    }
}
