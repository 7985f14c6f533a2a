//! Approval gate domain model
//!
//! A gate starts `Pending` and resolves exactly once, to `Approved` or
//! `Rejected`. A timeout is a rejection with [`RejectionReason::Timeout`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// Why a gate ended up rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// An actor rejected it
    Rejected,
    /// Nobody decided before the deadline
    Timeout,
    /// The execution was cancelled or superseded while waiting
    Cancelled,
}

/// Decision supplied by an external actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("approval gate already resolved as {0:?}")]
    AlreadyResolved(ApprovalState),
}

/// Approval gate attached to an APPROVAL action of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub stage: String,
    pub action: String,
    pub summary: Option<String>,
    pub state: ApprovalState,
    pub reason: Option<RejectionReason>,
    pub requested_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub comment: Option<String>,
}

impl ApprovalGate {
    pub fn new(
        execution_id: Uuid,
        pipeline_name: impl Into<String>,
        stage: impl Into<String>,
        action: impl Into<String>,
        summary: Option<String>,
        timeout: chrono::Duration,
    ) -> Self {
        let requested_at = Utc::now();
        Self {
            execution_id,
            pipeline_name: pipeline_name.into(),
            stage: stage.into(),
            action: action.into(),
            summary,
            state: ApprovalState::Pending,
            reason: None,
            requested_at,
            deadline: requested_at + timeout,
            resolved_at: None,
            resolved_by: None,
            comment: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == ApprovalState::Pending
    }

    /// Applies an actor's decision
    pub fn decide(
        &mut self,
        decision: Decision,
        actor: impl Into<String>,
        comment: Option<String>,
    ) -> Result<ApprovalState, GateError> {
        self.ensure_pending()?;

        self.state = match decision {
            Decision::Approved => ApprovalState::Approved,
            Decision::Rejected => {
                self.reason = Some(RejectionReason::Rejected);
                ApprovalState::Rejected
            }
        };
        self.resolved_by = Some(actor.into());
        self.comment = comment;
        self.resolved_at = Some(Utc::now());

        Ok(self.state)
    }

    /// Rejects the gate because its deadline passed
    pub fn expire(&mut self) -> Result<ApprovalState, GateError> {
        self.close(RejectionReason::Timeout)
    }

    /// Rejects the gate because the execution stopped
    pub fn cancel(&mut self) -> Result<ApprovalState, GateError> {
        self.close(RejectionReason::Cancelled)
    }

    fn close(&mut self, reason: RejectionReason) -> Result<ApprovalState, GateError> {
        self.ensure_pending()?;
        self.state = ApprovalState::Rejected;
        self.reason = Some(reason);
        self.resolved_at = Some(Utc::now());
        Ok(self.state)
    }

    fn ensure_pending(&self) -> Result<(), GateError> {
        if self.state != ApprovalState::Pending {
            return Err(GateError::AlreadyResolved(self.state));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ApprovalGate {
        ApprovalGate::new(
            Uuid::new_v4(),
            "V2Pipeline",
            "Deploy",
            "ApproveChanges",
            None,
            chrono::Duration::minutes(5),
        )
    }

    #[test]
    fn test_approve() {
        let mut gate = gate();
        assert!(gate.is_pending());

        let state = gate.decide(Decision::Approved, "alice", None).unwrap();
        assert_eq!(state, ApprovalState::Approved);
        assert_eq!(gate.resolved_by.as_deref(), Some("alice"));
        assert!(gate.reason.is_none());
    }

    #[test]
    fn test_reject() {
        let mut gate = gate();
        gate.decide(Decision::Rejected, "bob", Some("not today".to_string()))
            .unwrap();
        assert_eq!(gate.state, ApprovalState::Rejected);
        assert_eq!(gate.reason, Some(RejectionReason::Rejected));
    }

    #[test]
    fn test_resolution_is_terminal() {
        let mut gate = gate();
        gate.expire().unwrap();
        assert_eq!(gate.reason, Some(RejectionReason::Timeout));

        let err = gate.decide(Decision::Approved, "alice", None).unwrap_err();
        assert_eq!(err, GateError::AlreadyResolved(ApprovalState::Rejected));
        assert!(gate.cancel().is_err());
    }

    #[test]
    fn test_deadline_from_timeout() {
        let gate = gate();
        assert_eq!(gate.deadline - gate.requested_at, chrono::Duration::minutes(5));
    }
}
