//! Log domain types

use serde::{Deserialize, Serialize};

/// A log entry from an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    /// `stage/action` the entry belongs to, if any
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: Option<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            source,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
