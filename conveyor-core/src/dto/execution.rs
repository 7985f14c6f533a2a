//! Execution DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::execution::{Execution, ExecutionStatus, FailureCause};

/// Request to trigger a new execution from a source revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerExecution {
    pub branch: String,
    pub commit: String,
    /// Inline source files (path -> UTF-8 content). When absent the
    /// orchestrator snapshots its configured source directory.
    #[serde(default)]
    pub files: Option<BTreeMap<String, String>>,
}

/// Execution summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub sequence: u64,
    pub version: u32,
    pub status: ExecutionStatus,
    pub current_stage: Option<String>,
    pub commit: String,
    pub failure: Option<FailureCause>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Execution> for ExecutionSummary {
    fn from(execution: Execution) -> Self {
        Self {
            id: execution.id,
            pipeline_id: execution.pipeline_id,
            pipeline_name: execution.pipeline_name,
            sequence: execution.sequence,
            version: execution.version,
            status: execution.status,
            current_stage: execution.current_stage,
            commit: execution.trigger.commit,
            failure: execution.failure,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}
