//! Pipeline Service
//!
//! Registration, validation and version history of pipeline definitions.

use conveyor_core::domain::pipeline::{Pipeline, PipelineDefinition};
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary, ValidationReport, VersionSummary};
use conveyor_core::{ValidationError, validate};
use thiserror::Error;
use uuid::Uuid;

use crate::db::DbError;
use crate::engine::Engine;
use crate::repository::{execution_repository, pipeline_repository};

/// Service error type
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("{0}")]
    Conflict(String),
}

impl From<DbError> for PipelineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(msg) => PipelineError::Conflict(msg),
            DbError::NotFound(msg) => PipelineError::Conflict(format!("missing record: {}", msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Register a new pipeline as version 1
pub async fn create_pipeline(engine: &Engine, req: CreatePipeline) -> Result<Pipeline> {
    let validated = validate(req.definition)?;

    for warning in validated.warnings() {
        tracing::warn!(pipeline = %validated.name(), "{}", warning);
    }

    let pipeline = pipeline_repository::create(engine.db(), &validated).await?;

    tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);

    Ok(pipeline)
}

/// Validate a definition without registering it
pub fn validate_definition(definition: PipelineDefinition) -> ValidationReport {
    match validate(definition) {
        Ok(validated) => ValidationReport::from(&validated),
        Err(e) => ValidationReport::invalid(e),
    }
}

/// Get a pipeline by ID
pub async fn get_pipeline(engine: &Engine, id: Uuid) -> Result<Pipeline> {
    pipeline_repository::find_by_id(engine.db(), id)
        .await
        .ok_or(PipelineError::NotFound(id))
}

/// List all pipelines
pub async fn list_pipelines(engine: &Engine) -> Vec<PipelineSummary> {
    pipeline_repository::list_all(engine.db())
        .await
        .into_iter()
        .map(PipelineSummary::from)
        .collect()
}

/// Version history, oldest first
pub async fn list_versions(engine: &Engine, id: Uuid) -> Result<Vec<VersionSummary>> {
    let versions = pipeline_repository::versions(engine.db(), id)
        .await
        .ok_or(PipelineError::NotFound(id))?;

    Ok(versions.into_iter().map(VersionSummary::from).collect())
}

/// Delete a pipeline that has no execution in progress
pub async fn delete_pipeline(engine: &Engine, id: Uuid) -> Result<()> {
    let active = execution_repository::find_active_by_pipeline(engine.db(), id).await;
    if !active.is_empty() {
        return Err(PipelineError::Conflict(format!(
            "pipeline {} has {} execution(s) in progress",
            id,
            active.len()
        )));
    }

    if !pipeline_repository::delete(engine.db(), id).await {
        return Err(PipelineError::NotFound(id));
    }

    tracing::info!("Pipeline deleted: {}", id);

    Ok(())
}
