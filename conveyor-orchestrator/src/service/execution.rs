//! Execution Service
//!
//! Triggering, inspecting and cancelling executions.

use conveyor_core::domain::execution::{Execution, TriggerInfo};
use conveyor_core::domain::log::LogEntry;
use conveyor_core::dto::execution::{ExecutionSummary, TriggerExecution};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::{Engine, EngineError, FileMap};
use crate::repository::{execution_repository, log_repository, pipeline_repository};

/// Service error type
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("execution {0} is not in progress")]
    NotActive(Uuid),

    #[error("{0}")]
    Internal(String),
}

impl From<EngineError> for ExecutionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::PipelineNotFound(id) => ExecutionError::PipelineNotFound(id),
            EngineError::ExecutionNotFound(id) => ExecutionError::NotFound(id),
            EngineError::NotActive(id) => ExecutionError::NotActive(id),
            e @ (EngineError::BranchMismatch { .. }
            | EngineError::InvalidDefinition(_)
            | EngineError::Source(_)
            | EngineError::UnsafePath(_)) => ExecutionError::InvalidRequest(e.to_string()),
            e => ExecutionError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Start an execution from a source revision
pub async fn trigger_execution(
    engine: &Engine,
    pipeline_id: Uuid,
    req: TriggerExecution,
) -> Result<Execution> {
    let files: Option<FileMap> = req.files.map(|files| {
        files
            .into_iter()
            .map(|(path, content)| (path, content.into_bytes()))
            .collect()
    });

    let trigger = TriggerInfo {
        branch: req.branch,
        commit: req.commit,
    };

    let execution = engine.trigger(pipeline_id, trigger, files).await?;

    tracing::info!(
        "Execution #{} of {} started ({})",
        execution.sequence,
        execution.pipeline_name,
        execution.id
    );

    Ok(execution)
}

/// Get an execution with its stage records and failure cause
pub async fn get_execution(engine: &Engine, id: Uuid) -> Result<Execution> {
    execution_repository::find_by_id(engine.db(), id)
        .await
        .ok_or(ExecutionError::NotFound(id))
}

/// List all executions, newest first
pub async fn list_executions(engine: &Engine) -> Vec<ExecutionSummary> {
    execution_repository::list_all(engine.db())
        .await
        .into_iter()
        .map(ExecutionSummary::from)
        .collect()
}

/// List executions of one pipeline, highest sequence first
pub async fn list_executions_by_pipeline(
    engine: &Engine,
    pipeline_id: Uuid,
) -> Result<Vec<ExecutionSummary>> {
    pipeline_repository::find_by_id(engine.db(), pipeline_id)
        .await
        .ok_or(ExecutionError::PipelineNotFound(pipeline_id))?;

    Ok(execution_repository::find_by_pipeline(engine.db(), pipeline_id)
        .await
        .into_iter()
        .map(ExecutionSummary::from)
        .collect())
}

/// Request cancellation of a running execution
pub async fn cancel_execution(engine: &Engine, id: Uuid) -> Result<Execution> {
    let execution = engine.cancel(id).await?;
    tracing::info!("Cancellation requested for execution {}", id);
    Ok(execution)
}

/// Log entries of an execution, in the order they were recorded
pub async fn get_execution_logs(engine: &Engine, id: Uuid) -> Result<Vec<LogEntry>> {
    get_execution(engine, id).await?;
    Ok(log_repository::find_by_execution(engine.db(), id).await)
}
