//! Approval API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::approval::ApprovalGate;
use conveyor_core::dto::approval::{ApprovalRequest, PendingApproval};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::engine::Engine;
use crate::service::approval_service;

/// GET /approval/pending
pub async fn list_pending(State(engine): State<Engine>) -> Json<Vec<PendingApproval>> {
    tracing::debug!("Listing pending approvals");
    Json(approval_service::list_pending(&engine).await)
}

/// POST /execution/{id}/approval/{action}
/// Approve or reject the gate of an execution
pub async fn decide(
    State(engine): State<Engine>,
    Path((id, action)): Path<(Uuid, String)>,
    Json(req): Json<ApprovalRequest>,
) -> ApiResult<Json<ApprovalGate>> {
    tracing::info!("{} submitted {:?} for {}/{}", req.actor, req.decision, id, action);
    Ok(Json(approval_service::decide(&engine, id, &action, req).await?))
}
