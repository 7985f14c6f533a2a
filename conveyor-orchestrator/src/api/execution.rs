//! Execution API Handlers
//!
//! HTTP endpoints for execution status, logs and cancellation.

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::execution::Execution;
use conveyor_core::domain::log::LogEntry;
use conveyor_core::dto::execution::ExecutionSummary;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::engine::Engine;
use crate::service::execution_service;

/// GET /execution/list
pub async fn list_executions(State(engine): State<Engine>) -> Json<Vec<ExecutionSummary>> {
    tracing::debug!("Listing all executions");
    Json(execution_service::list_executions(&engine).await)
}

/// GET /execution/pipeline/{pipeline_id}
pub async fn list_executions_by_pipeline(
    State(engine): State<Engine>,
    Path(pipeline_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ExecutionSummary>>> {
    tracing::debug!("Listing executions for pipeline: {}", pipeline_id);
    Ok(Json(
        execution_service::list_executions_by_pipeline(&engine, pipeline_id).await?,
    ))
}

/// GET /execution/{id}
pub async fn get_execution(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    tracing::debug!("Getting execution: {}", id);
    Ok(Json(execution_service::get_execution(&engine, id).await?))
}

/// POST /execution/{id}/cancel
pub async fn cancel_execution(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    tracing::info!("Cancelling execution: {}", id);
    Ok(Json(execution_service::cancel_execution(&engine, id).await?))
}

/// GET /execution/{id}/logs
pub async fn get_execution_logs(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    tracing::debug!("Getting logs for execution: {}", id);
    Ok(Json(execution_service::get_execution_logs(&engine, id).await?))
}
