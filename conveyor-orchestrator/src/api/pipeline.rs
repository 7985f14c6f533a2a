//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline registration and version history.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conveyor_core::domain::execution::Execution;
use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::dto::execution::TriggerExecution;
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary, ValidationReport, VersionSummary};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::engine::Engine;
use crate::service::{execution_service, pipeline_service};

/// POST /pipeline/create
pub async fn create_pipeline(
    State(engine): State<Engine>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline: {}", req.definition.name);

    let pipeline = pipeline_service::create_pipeline(&engine, req).await?;
    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// POST /pipeline/validate
/// Validate a definition and return its execution plan; never registers it
pub async fn validate_pipeline(Json(req): Json<CreatePipeline>) -> Json<ValidationReport> {
    tracing::debug!("Validating pipeline: {}", req.definition.name);
    Json(pipeline_service::validate_definition(req.definition))
}

/// GET /pipeline/list
pub async fn list_pipelines(State(engine): State<Engine>) -> Json<Vec<PipelineSummary>> {
    tracing::debug!("Listing all pipelines");
    Json(pipeline_service::list_pipelines(&engine).await)
}

/// GET /pipeline/{id}
pub async fn get_pipeline(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);
    Ok(Json(pipeline_service::get_pipeline(&engine, id).await?))
}

/// GET /pipeline/{id}/versions
pub async fn list_versions(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<VersionSummary>>> {
    tracing::debug!("Listing versions of pipeline: {}", id);
    Ok(Json(pipeline_service::list_versions(&engine, id).await?))
}

/// DELETE /pipeline/{id}
pub async fn delete_pipeline(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline: {}", id);

    pipeline_service::delete_pipeline(&engine, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /pipeline/{id}/trigger
/// Start an execution from a source revision
pub async fn trigger_pipeline(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
    Json(req): Json<TriggerExecution>,
) -> ApiResult<(StatusCode, Json<Execution>)> {
    tracing::info!("Triggering pipeline {} at {}@{}", id, req.branch, req.commit);

    let execution = execution_service::trigger_execution(&engine, id, req).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}
