//! ID resolver module
//!
//! Resolves UUID prefixes to full UUIDs by listing the matching resources
//! from the orchestrator.

use anyhow::{Context, Result};
use conveyor_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID or prefix to a full UUID
///
/// A full UUID is returned without contacting the orchestrator. Otherwise the
/// pipelines are listed and `id` is matched against names first, then against
/// id prefixes.
///
/// # Arguments
/// * `client` - The orchestrator client used to list pipelines
/// * `id` - A full UUID, a pipeline name, or an id prefix
///
/// # Errors
/// Returns an error if:
/// - No pipeline matches
/// - Multiple pipelines match the prefix (ambiguous)
/// - The API call fails
pub async fn resolve_pipeline_id(client: &OrchestratorClient, id: &str) -> Result<Uuid> {
    let id_or_prefix = IdOrPrefix::parse(id);
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    // A pipeline name is accepted as well as an id prefix
    if let Some(pipeline) = pipelines.iter().find(|p| p.name == id) {
        return Ok(pipeline.id);
    }

    let ids: Vec<Uuid> = pipelines.iter().map(|p| p.id).collect();
    id_or_prefix.resolve_among("pipeline", &ids)
}

/// Resolve an execution ID or prefix to a full UUID
///
/// # Arguments
/// * `client` - The orchestrator client used to list executions
/// * `id` - A full UUID or an id prefix
///
/// # Errors
/// Returns an error if no execution or more than one matches, or the API call fails.
pub async fn resolve_execution_id(client: &OrchestratorClient, id: &str) -> Result<Uuid> {
    let id_or_prefix = IdOrPrefix::parse(id);
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let executions = client
        .list_executions()
        .await
        .context("Failed to fetch executions for ID resolution")?;

    let ids: Vec<Uuid> = executions.iter().map(|e| e.id).collect();
    id_or_prefix.resolve_among("execution", &ids)
}
