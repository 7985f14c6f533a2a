//! Approval gate endpoints

use conveyor_core::domain::approval::{ApprovalGate, Decision};
use conveyor_core::dto::approval::{ApprovalRequest, PendingApproval};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Gates currently waiting for a decision
    pub async fn list_pending_approvals(&self) -> Result<Vec<PendingApproval>> {
        let response = self.client.get(self.url("/approval/pending")).send().await?;
        self.handle_response(response).await
    }

    /// Approve or reject the gate held by `action` in an execution
    ///
    /// # Arguments
    /// * `execution_id` - The execution waiting at the gate
    /// * `action` - Name of the approval action
    /// * `decision` - Approve or reject
    /// * `actor` - Who made the decision, recorded on the gate
    /// * `comment` - Optional note stored alongside the decision
    ///
    /// # Returns
    /// The gate with its recorded decision
    ///
    /// # Errors
    /// Returns `ClientError::ApiError` with status 404 if no gate is pending for
    /// the action, or 409 if the gate was already decided.
    pub async fn decide_approval(
        &self,
        execution_id: Uuid,
        action: &str,
        decision: Decision,
        actor: impl Into<String>,
        comment: Option<String>,
    ) -> Result<ApprovalGate> {
        let req = ApprovalRequest {
            decision,
            actor: actor.into(),
            comment,
        };

        let response = self
            .client
            .post(self.url(&format!("/execution/{}/approval/{}", execution_id, action)))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
