//! Stack API Handlers

use axum::{Json, extract::State};
use conveyor_core::dto::stack::StackSummary;

use crate::engine::Engine;
use crate::service::stack_service;

/// GET /stack/list
pub async fn list_stacks(State(engine): State<Engine>) -> Json<Vec<StackSummary>> {
    Json(stack_service::list_stacks(&engine).await)
}
