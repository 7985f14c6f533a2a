//! Approval gates
//!
//! A waiting APPROVAL action parks on a oneshot channel registered here. The
//! gate's state itself lives in the approval repository; this registry only
//! wakes the waiter once a decision has been written.

use conveyor_core::domain::approval::{ApprovalGate, ApprovalState, RejectionReason};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::engine::{StopReason, stopped};
use crate::repository::approval_repository;

type GateKey = (Uuid, String);

/// How a wait on a gate ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Approved,
    Rejected {
        actor: Option<String>,
        comment: Option<String>,
    },
    TimedOut(Duration),
    Cancelled,
}

#[derive(Default)]
pub struct ApprovalRegistry {
    waiters: Mutex<HashMap<GateKey, oneshot::Sender<()>>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a gate and waits until it resolves
    ///
    /// The gate resolves on the first of: a decision, the timeout, or the
    /// execution being stopped.
    pub async fn wait(
        &self,
        db: &Database,
        gate: ApprovalGate,
        timeout: Duration,
        stop: &mut watch::Receiver<Option<StopReason>>,
    ) -> GateOutcome {
        let key = (gate.execution_id, gate.action.clone());
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(key.clone(), tx);

        let execution_id = gate.execution_id;
        let action = gate.action.clone();
        approval_repository::create(db, gate).await;

        info!(%execution_id, action = %action, ?timeout, "Waiting for approval");

        // A stop requested before the gate opened still counts
        let already_stopped = stop.borrow().is_some();

        if !already_stopped {
            tokio::select! {
                _ = rx => {
                    debug!(%execution_id, action = %action, "Approval gate decided");
                }
                _ = tokio::time::sleep(timeout) => {
                    let expired = approval_repository::resolve(db, execution_id, &action, |g| g.expire()).await;
                    if matches!(expired, Some(Ok(_))) {
                        warn!(%execution_id, action = %action, "Approval gate timed out");
                    }
                }
                _ = stopped(stop) => {
                    approval_repository::resolve(db, execution_id, &action, |g| g.cancel()).await;
                }
            }
        } else {
            approval_repository::resolve(db, execution_id, &action, |g| g.cancel()).await;
        }

        self.waiters.lock().await.remove(&key);

        // The repository decides which resolution won
        match approval_repository::find(db, execution_id, &action).await {
            Some(gate) => match (gate.state, gate.reason) {
                (ApprovalState::Approved, _) => GateOutcome::Approved,
                (ApprovalState::Rejected, Some(RejectionReason::Timeout)) => {
                    GateOutcome::TimedOut(timeout)
                }
                (ApprovalState::Rejected, Some(RejectionReason::Cancelled)) => GateOutcome::Cancelled,
                (ApprovalState::Rejected, _) => GateOutcome::Rejected {
                    actor: gate.resolved_by,
                    comment: gate.comment,
                },
                (ApprovalState::Pending, _) => GateOutcome::Cancelled,
            },
            None => GateOutcome::Cancelled,
        }
    }

    /// Wakes the waiter of a gate after its decision was stored
    pub async fn notify(&self, execution_id: Uuid, action: &str) {
        let sender = self
            .waiters
            .lock()
            .await
            .remove(&(execution_id, action.to_string()));

        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}
