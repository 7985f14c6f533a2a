//! Approval Service
//!
//! Lists pending gates and records decisions on them.

use conveyor_core::domain::approval::{ApprovalGate, GateError};
use conveyor_core::dto::approval::{ApprovalRequest, PendingApproval};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::{Engine, EngineError};
use crate::repository::approval_repository;

/// Service error type
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("execution {execution_id} has no approval gate for action '{action}'")]
    GateNotFound { execution_id: Uuid, action: String },

    #[error(transparent)]
    AlreadyResolved(GateError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl From<EngineError> for ApprovalError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ExecutionNotFound(id) => ApprovalError::ExecutionNotFound(id),
            EngineError::GateNotFound {
                execution_id,
                action,
            } => ApprovalError::GateNotFound {
                execution_id,
                action,
            },
            EngineError::Gate(e) => ApprovalError::AlreadyResolved(e),
            e => ApprovalError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApprovalError>;

/// Gates waiting for a decision, oldest first
pub async fn list_pending(engine: &Engine) -> Vec<PendingApproval> {
    approval_repository::list_pending(engine.db())
        .await
        .into_iter()
        .map(PendingApproval::from)
        .collect()
}

/// Record an approve/reject decision on a pending gate
pub async fn decide(
    engine: &Engine,
    execution_id: Uuid,
    action: &str,
    req: ApprovalRequest,
) -> Result<ApprovalGate> {
    if req.actor.trim().is_empty() {
        return Err(ApprovalError::InvalidRequest(
            "actor must not be empty".to_string(),
        ));
    }

    let gate = engine
        .decide(execution_id, action, req.decision, &req.actor, req.comment)
        .await?;

    tracing::info!(
        "Gate {} of execution {} resolved by {}: {:?}",
        action,
        execution_id,
        req.actor,
        gate.state
    );

    Ok(gate)
}
