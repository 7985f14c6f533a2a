//! Execution domain types
//!
//! An execution is one run of a pipeline. Its record carries the terminal
//! status and the full failure cause chain so both can be queried afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::pipeline::ActionKind;

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    Superseded,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::InProgress)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::InProgress => "IN_PROGRESS",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Superseded => "SUPERSEDED",
        };
        write!(f, "{}", s)
    }
}

/// Source revision that started an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub branch: String,
    pub commit: String,
}

/// Execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    /// Per-pipeline monotonically increasing number
    pub sequence: u64,
    /// Sequence of the trigger that pushed this execution's source; a
    /// restart keeps the value of the execution it replaces
    pub source_sequence: u64,
    /// Definition version this execution is bound to
    pub version: u32,
    pub status: ExecutionStatus,
    pub trigger: TriggerInfo,
    pub current_stage: Option<String>,
    pub stages: Vec<StageRecord>,
    pub failure: Option<FailureCause>,
    /// Source artifact emitted by the Source action
    pub source_artifact: Option<Uuid>,
    /// Replacement execution started when this one was superseded
    pub superseded_by: Option<Uuid>,
    /// Execution this one restarts, if any
    pub restart_of: Option<Uuid>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Execution {
    pub fn new(
        pipeline_id: Uuid,
        pipeline_name: String,
        sequence: u64,
        version: u32,
        trigger: TriggerInfo,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            pipeline_name,
            sequence,
            source_sequence: sequence,
            version,
            status: ExecutionStatus::InProgress,
            trigger,
            current_stage: None,
            stages: Vec::new(),
            failure: None,
            source_artifact: None,
            superseded_by: None,
            restart_of: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().rev().find(|s| s.name == name)
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageRecord> {
        self.stages.iter_mut().rev().find(|s| s.name == name)
    }

    /// Looks up an action record by stage and action name
    pub fn action(&self, stage: &str, action: &str) -> Option<&ActionRecord> {
        self.stage(stage)
            .and_then(|s| s.actions.iter().find(|a| a.name == action))
    }

    /// Finishes the execution with a terminal status
    pub fn finish(&mut self, status: ExecutionStatus, failure: Option<FailureCause>) {
        self.status = status;
        self.failure = failure;
        self.current_stage = None;
        self.completed_at = Some(chrono::Utc::now());
    }
}

/// Stage status within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

/// Per-stage execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub actions: Vec<ActionRecord>,
}

impl StageRecord {
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::InProgress,
            started_at: chrono::Utc::now(),
            completed_at: None,
            actions: Vec::new(),
        }
    }

    pub fn action_mut(&mut self, name: &str) -> Option<&mut ActionRecord> {
        self.actions.iter_mut().find(|a| a.name == name)
    }
}

/// Action status within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    InProgress,
    Succeeded,
    Failed,
    /// Finished after a sibling failed; its outputs were dropped
    Discarded,
    /// Never started because a sibling failed first
    Skipped,
}

/// Per-action execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,
    pub kind: ActionKind,
    pub run_order: u32,
    pub status: ActionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Ids of artifacts bound from this action's outputs
    pub outputs: Vec<Uuid>,
    pub message: Option<String>,
}

impl ActionRecord {
    pub fn started(name: impl Into<String>, kind: ActionKind, run_order: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            run_order,
            status: ActionStatus::InProgress,
            started_at: chrono::Utc::now(),
            completed_at: None,
            outputs: Vec::new(),
            message: None,
        }
    }
}

/// Error category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Validation,
    Build,
    Permission,
    ApprovalRejected,
    Timeout,
    Preview,
    Apply,
    Custom,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Validation => "ValidationError",
            FailureKind::Build => "BuildError",
            FailureKind::Permission => "PermissionError",
            FailureKind::ApprovalRejected => "ApprovalRejected",
            FailureKind::Timeout => "Timeout",
            FailureKind::Preview => "PreviewError",
            FailureKind::Apply => "ApplyError",
            FailureKind::Custom => "CustomActionError",
            FailureKind::Internal => "InternalError",
        };
        write!(f, "{}", s)
    }
}

/// Failure cause chain: stage, action and underlying cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub stage: String,
    pub action: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Some(action) => write!(
                f,
                "stage '{}' -> action '{}' -> {}: {}",
                self.stage, action, self.kind, self.message
            ),
            None => write!(f, "stage '{}' -> {}: {}", self.stage, self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::InProgress.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(ExecutionStatus::Superseded.is_terminal());
    }

    #[test]
    fn test_finish_clears_stage_pointer() {
        let mut execution = Execution::new(
            Uuid::new_v4(),
            "V2Pipeline".to_string(),
            1,
            1,
            TriggerInfo {
                branch: "main".to_string(),
                commit: "abc123".to_string(),
            },
        );
        execution.current_stage = Some("Deploy".to_string());

        execution.finish(
            ExecutionStatus::Failed,
            Some(FailureCause {
                stage: "Deploy".to_string(),
                action: Some("ApproveChanges".to_string()),
                kind: FailureKind::Timeout,
                message: "approval timed out".to_string(),
            }),
        );

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.current_stage.is_none());
        assert!(execution.completed_at.is_some());
        assert_eq!(
            execution.failure.unwrap().to_string(),
            "stage 'Deploy' -> action 'ApproveChanges' -> Timeout: approval timed out"
        );
    }
}
