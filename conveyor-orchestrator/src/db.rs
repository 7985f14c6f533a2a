//! Database Module
//!
//! In-memory storage shared by the repositories. Each table sits behind its
//! own lock so readers of one entity never wait on writers of another.

use conveyor_core::domain::approval::ApprovalGate;
use conveyor_core::domain::artifact::Artifact;
use conveyor_core::domain::execution::Execution;
use conveyor_core::domain::log::LogEntry;
use conveyor_core::domain::pipeline::{Pipeline, PipelineVersion};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Pipeline row: the live record plus its version history
#[derive(Debug, Clone)]
pub(crate) struct PipelineRow {
    pub pipeline: Pipeline,
    pub versions: Vec<PipelineVersion>,
    pub next_sequence: u64,
    /// Trigger sequence of the source the latest version was derived from
    pub source_sequence: u64,
}

/// Artifact row: the content plus the execution whose lifetime it shares
#[derive(Debug, Clone)]
pub(crate) struct ArtifactRow {
    pub owner: Uuid,
    pub artifact: Arc<Artifact>,
}

#[derive(Default)]
pub(crate) struct Tables {
    pub pipelines: RwLock<HashMap<Uuid, PipelineRow>>,
    pub executions: RwLock<HashMap<Uuid, Execution>>,
    pub logs: RwLock<HashMap<Uuid, Vec<LogEntry>>>,
    pub artifacts: RwLock<HashMap<Uuid, ArtifactRow>>,
    pub approvals: RwLock<HashMap<Uuid, Vec<ApprovalGate>>>,
}

/// Handle to the orchestrator's storage
#[derive(Clone, Default)]
pub struct Database {
    pub(crate) tables: Arc<Tables>,
}

impl Database {
    /// Creates an empty database
    pub fn new() -> Self {
        tracing::info!("Initialized in-memory database");
        Self::default()
    }
}
