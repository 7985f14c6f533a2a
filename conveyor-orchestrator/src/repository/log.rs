//! Log Repository
//!
//! Per-execution log entries.

use conveyor_core::domain::log::LogEntry;
use uuid::Uuid;

use crate::db::Database;

/// Append log entries to an execution's log
pub async fn add_entries(db: &Database, execution_id: Uuid, entries: Vec<LogEntry>) {
    if entries.is_empty() {
        return;
    }

    let mut logs = db.tables.logs.write().await;
    logs.entry(execution_id).or_default().extend(entries);
}

/// Get every log entry of an execution, oldest first
pub async fn find_by_execution(db: &Database, execution_id: Uuid) -> Vec<LogEntry> {
    let logs = db.tables.logs.read().await;
    logs.get(&execution_id).cloned().unwrap_or_default()
}
