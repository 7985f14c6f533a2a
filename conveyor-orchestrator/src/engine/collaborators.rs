//! Collaborator interfaces
//!
//! The engine talks to the outside world only through these traits: where
//! source snapshots come from, how build commands run, who hands out
//! credentials, and what computes and applies change-sets. Local
//! implementations live in [`crate::engine::local`].

use async_trait::async_trait;
use conveyor_core::domain::artifact::Artifact;
use conveyor_core::domain::changeset::{ChangeSetHandle, StackState};
use conveyor_core::domain::pipeline::Capability;
use conveyor_core::{ApplyError, BuildError, PermissionError, PreviewError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::engine::log_buffer::ActionLog;

/// File path -> content
pub type FileMap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source snapshot unavailable: {0}")]
    Unavailable(String),
}

/// Produces the source snapshot of a pushed revision
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn notify(&self, branch: &str, commit: &str) -> Result<Artifact, SourceError>;
}

/// Commands and output selection of one build action
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub install_commands: Vec<String>,
    pub commands: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Workspace-relative directory the output is taken from
    pub base_directory: Option<String>,
    /// Glob patterns selecting output files; empty selects everything
    pub files: Vec<String>,
}

/// Runs build commands against an input workspace
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs every command in order, stopping at the first failure, and
    /// returns the selected output files.
    async fn run(
        &self,
        spec: &CommandSpec,
        workspace: &FileMap,
        log: &ActionLog,
    ) -> Result<FileMap, BuildError>;
}

/// Time-limited credentials for an assumed role
#[derive(Debug, Clone)]
pub struct Credentials {
    pub role: String,
    pub tags: Vec<String>,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Issues credentials for role patterns
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn assume(
        &self,
        role_pattern: &str,
        required_tags: &[String],
    ) -> Result<Credentials, PermissionError>;
}

/// Inputs to change-set computation
#[derive(Debug, Clone)]
pub struct PrepareRequest<'a> {
    pub stack_name: &'a str,
    pub change_set_name: &'a str,
    pub template: &'a [u8],
    pub capabilities: &'a [Capability],
}

/// Computes and applies change-sets against live stacks
#[async_trait]
pub trait ChangeSetEngine: Send + Sync {
    /// Computes a change-set without modifying the stack
    async fn prepare(&self, request: PrepareRequest<'_>) -> Result<ChangeSetHandle, PreviewError>;

    /// Applies a previously prepared change-set
    async fn execute(&self, handle: &ChangeSetHandle) -> Result<StackState, ApplyError>;

    /// Drops a prepared change-set that will never be executed
    ///
    /// Returns false when the handle was already executed or discarded.
    async fn discard(&self, handle: &ChangeSetHandle) -> bool;

    /// Live state of every known stack
    async fn stacks(&self) -> Vec<StackState>;
}

/// Handler for CUSTOM actions, registered by name
#[async_trait]
pub trait CustomActionHandler: Send + Sync {
    async fn invoke(
        &self,
        config: &serde_json::Value,
        inputs: &[Arc<Artifact>],
        log: &ActionLog,
    ) -> Result<FileMap, String>;
}

/// Every collaborator the engine needs
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceProvider>,
    pub runner: Arc<dyn CommandRunner>,
    pub credentials: Arc<dyn CredentialIssuer>,
    pub change_sets: Arc<dyn ChangeSetEngine>,
    pub custom: HashMap<String, Arc<dyn CustomActionHandler>>,
}

impl Collaborators {
    pub fn new(
        source: Arc<dyn SourceProvider>,
        runner: Arc<dyn CommandRunner>,
        credentials: Arc<dyn CredentialIssuer>,
        change_sets: Arc<dyn ChangeSetEngine>,
    ) -> Self {
        Self {
            source,
            runner,
            credentials,
            change_sets,
            custom: HashMap::new(),
        }
    }

    /// Registers a handler for CUSTOM actions naming `handler`
    pub fn with_custom(
        mut self,
        handler: impl Into<String>,
        implementation: Arc<dyn CustomActionHandler>,
    ) -> Self {
        self.custom.insert(handler.into(), implementation);
        self
    }
}
