//! Approval Repository
//!
//! Approval gates, the single source of truth for gate state. Decisions and
//! timeouts both resolve a gate through [`resolve`], so exactly one of them
//! wins.

use conveyor_core::domain::approval::{ApprovalGate, ApprovalState, GateError};
use uuid::Uuid;

use crate::db::Database;

/// Open a new gate
pub async fn create(db: &Database, gate: ApprovalGate) -> ApprovalGate {
    let mut approvals = db.tables.approvals.write().await;
    approvals
        .entry(gate.execution_id)
        .or_default()
        .push(gate.clone());
    gate
}

/// Resolve the latest gate of an execution's action
///
/// Returns `None` when the execution has no gate for that action.
pub async fn resolve<F>(
    db: &Database,
    execution_id: Uuid,
    action: &str,
    f: F,
) -> Option<Result<ApprovalGate, GateError>>
where
    F: FnOnce(&mut ApprovalGate) -> Result<ApprovalState, GateError>,
{
    let mut approvals = db.tables.approvals.write().await;
    let gate = approvals
        .get_mut(&execution_id)?
        .iter_mut()
        .rev()
        .find(|g| g.action == action)?;

    Some(f(gate).map(|_| gate.clone()))
}

/// Latest gate of an execution's action
pub async fn find(db: &Database, execution_id: Uuid, action: &str) -> Option<ApprovalGate> {
    let approvals = db.tables.approvals.read().await;
    approvals
        .get(&execution_id)?
        .iter()
        .rev()
        .find(|g| g.action == action)
        .cloned()
}

/// Every gate still waiting for a decision, oldest first
pub async fn list_pending(db: &Database) -> Vec<ApprovalGate> {
    let approvals = db.tables.approvals.read().await;
    let mut pending: Vec<ApprovalGate> = approvals
        .values()
        .flatten()
        .filter(|g| g.is_pending())
        .cloned()
        .collect();
    pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::approval::Decision;

    fn gate(execution_id: Uuid) -> ApprovalGate {
        ApprovalGate::new(
            execution_id,
            "V2Pipeline",
            "Deploy",
            "ApproveChanges",
            None,
            chrono::Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let db = Database::new();
        let execution_id = Uuid::new_v4();
        create(&db, gate(execution_id)).await;
        assert_eq!(list_pending(&db).await.len(), 1);

        let approved = resolve(&db, execution_id, "ApproveChanges", |g| {
            g.decide(Decision::Approved, "alice", None)
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(approved.state, ApprovalState::Approved);

        // A timeout racing the decision loses
        let late = resolve(&db, execution_id, "ApproveChanges", |g| g.expire())
            .await
            .unwrap();
        assert!(late.is_err());

        assert!(list_pending(&db).await.is_empty());
        assert_eq!(
            find(&db, execution_id, "ApproveChanges").await.unwrap().state,
            ApprovalState::Approved
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_gate() {
        let db = Database::new();
        let result = resolve(&db, Uuid::new_v4(), "ApproveChanges", |g| g.expire()).await;
        assert!(result.is_none());
    }
}
