//! Approval DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalGate, Decision};

/// Decision submitted for a pending gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub decision: Decision,
    pub actor: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Pending gate as shown to approvers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub stage: String,
    pub action: String,
    pub summary: Option<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub deadline: chrono::DateTime<chrono::Utc>,
}

impl From<ApprovalGate> for PendingApproval {
    fn from(gate: ApprovalGate) -> Self {
        Self {
            execution_id: gate.execution_id,
            pipeline_name: gate.pipeline_name,
            stage: gate.stage,
            action: gate.action,
            summary: gate.summary,
            requested_at: gate.requested_at,
            deadline: gate.deadline,
        }
    }
}
