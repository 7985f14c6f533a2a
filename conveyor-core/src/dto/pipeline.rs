//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{ExecutionMode, Pipeline, PipelineDefinition, PipelineVersion, VersionOrigin};
use crate::validation::{ValidatedPipeline, partition_by_run_order};

/// Request to register a new pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub definition: PipelineDefinition,
}

/// Lightweight pipeline summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub mode: ExecutionMode,
    pub version: u32,
    pub stage_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Pipeline> for PipelineSummary {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            id: pipeline.id,
            name: pipeline.name,
            mode: pipeline.definition.mode,
            version: pipeline.version,
            stage_count: pipeline.definition.stages.len(),
            created_at: pipeline.created_at,
            updated_at: pipeline.updated_at,
        }
    }
}

/// Version history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: u32,
    pub digest: String,
    pub origin: VersionOrigin,
    pub stages: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineVersion> for VersionSummary {
    fn from(version: PipelineVersion) -> Self {
        Self {
            version: version.version,
            digest: version.digest,
            origin: version.origin,
            stages: version
                .definition
                .stages
                .into_iter()
                .map(|s| s.name)
                .collect(),
            created_at: version.created_at,
        }
    }
}

/// Outcome of validating a definition without registering it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub digest: Option<String>,
    pub stages: Vec<StagePlan>,
}

/// Execution plan of one stage: action names grouped by run order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePlan {
    pub name: String,
    pub partitions: Vec<RunOrderGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOrderGroup {
    pub run_order: u32,
    pub actions: Vec<String>,
}

impl From<&ValidatedPipeline> for ValidationReport {
    fn from(validated: &ValidatedPipeline) -> Self {
        let stages = validated
            .definition()
            .stages
            .iter()
            .map(|stage| StagePlan {
                name: stage.name.clone(),
                partitions: partition_by_run_order(stage)
                    .into_iter()
                    .map(|p| RunOrderGroup {
                        run_order: p.run_order,
                        actions: p.actions.iter().map(|a| a.name.clone()).collect(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            valid: true,
            error: None,
            warnings: validated.warnings().to_vec(),
            digest: Some(validated.digest().to_string()),
            stages,
        }
    }
}

impl ValidationReport {
    pub fn invalid(error: impl std::fmt::Display) -> Self {
        Self {
            valid: false,
            error: Some(error.to_string()),
            warnings: Vec::new(),
            digest: None,
            stages: Vec::new(),
        }
    }
}
