//! Action execution
//!
//! One function per action kind. Each returns the files bound to the
//! action's declared outputs (if any) or the error that failed it.

use conveyor_core::domain::approval::ApprovalGate;
use conveyor_core::domain::artifact::Artifact;
use conveyor_core::domain::execution::FailureKind;
use conveyor_core::domain::pipeline::{
    ActionDefinition, ActionParams, ArtifactRef, BuildParams, Capability, PipelineDefinition,
    SelfMutation,
};
use conveyor_core::{
    ApplyError, BuildError, PermissionError, PreviewError, ValidatedPipeline, ValidationError,
    validate,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::engine::approval::GateOutcome;
use crate::engine::collaborators::{CommandSpec, FileMap, PrepareRequest};
use crate::engine::log_buffer::ActionLog;
use crate::engine::run::RunContext;

/// Upper bound on a gate's recorded deadline
const MAX_GATE_DEADLINE: chrono::Duration = chrono::Duration::days(36_500);

/// Why an action did not succeed
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("approval rejected by {}{}", actor.as_deref().unwrap_or("unknown"), comment.as_ref().map(|c| format!(": {}", c)).unwrap_or_default())]
    ApprovalRejected {
        actor: Option<String>,
        comment: Option<String>,
    },

    #[error("no decision within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("{0}")]
    Custom(String),

    #[error("execution stopped while the action was waiting")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ActionError::Validation(_) => FailureKind::Validation,
            ActionError::Build(_) => FailureKind::Build,
            ActionError::Permission(_) => FailureKind::Permission,
            ActionError::ApprovalRejected { .. } => FailureKind::ApprovalRejected,
            ActionError::Timeout(_) => FailureKind::Timeout,
            ActionError::Preview(_) => FailureKind::Preview,
            ActionError::Apply(_) => FailureKind::Apply,
            ActionError::Custom(_) => FailureKind::Custom,
            ActionError::Cancelled | ActionError::Internal(_) => FailureKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::Cancelled)
    }
}

/// An input artifact as the action sees it, after sub-path selection
#[derive(Debug, Clone)]
pub struct ActionInput {
    pub reference: ArtifactRef,
    pub artifact: Arc<Artifact>,
}

impl ActionInput {
    /// Files addressed by the reference
    fn files(&self) -> Result<FileMap, ActionError> {
        match &self.reference.path {
            None => Ok(self.artifact.files.clone()),
            Some(path) => self.artifact.select(path).ok_or_else(|| {
                ActionError::Validation(ValidationError::Malformed(format!(
                    "path '{}' does not exist in artifact '{}'",
                    path, self.reference.artifact
                )))
            }),
        }
    }
}

/// Successful action result
#[derive(Debug, Default)]
pub struct ActionOutput {
    /// Content bound to each declared output
    pub files: Option<FileMap>,
    /// Re-derived definition produced by the self-mutation step
    pub mutation: Option<ValidatedPipeline>,
}

impl ActionOutput {
    fn files(files: FileMap) -> Self {
        Self {
            files: Some(files),
            mutation: None,
        }
    }
}

/// Everything one action task needs
pub struct ActionTask {
    pub engine: Engine,
    pub run: Arc<RunContext>,
    pub stage: String,
    pub action: ActionDefinition,
    pub inputs: Vec<ActionInput>,
    pub log: ActionLog,
}

impl ActionTask {
    pub async fn execute(self) -> Result<ActionOutput, ActionError> {
        if let Some(role) = &self.action.role {
            let role_name = self.engine.config().expand(&role.name);
            self.engine
                .collaborators()
                .credentials
                .assume(&role_name, &[])
                .await?;
            self.log.debug(format!("Assumed role {}", role_name));
        }

        match &self.action.params {
            ActionParams::Source { repository, .. } => self.source(repository).await,
            ActionParams::Build(build) => self.build(build).await,
            ActionParams::Approval {
                timeout_secs,
                summary,
            } => self.approval(*timeout_secs, summary.clone()).await,
            ActionParams::DeployPrepare {
                stack_name,
                change_set_name,
                template,
                capabilities,
                admin_permissions,
                deployment_role,
            } => {
                self.deploy_prepare(
                    stack_name,
                    change_set_name,
                    template,
                    capabilities,
                    *admin_permissions,
                    deployment_role.as_deref(),
                )
                .await
            }
            ActionParams::DeployExecute {
                stack_name,
                change_set_name,
            } => self.deploy_execute(stack_name, change_set_name).await,
            ActionParams::Custom { handler, config } => self.custom(handler, config).await,
        }
    }

    async fn source(&self, repository: &str) -> Result<ActionOutput, ActionError> {
        let source = &self.run.source;
        self.log.info(format!(
            "Source {}@{} ({}) with {} file(s)",
            repository,
            self.run.trigger.branch,
            self.run.trigger.commit,
            source.files.len()
        ));
        Ok(ActionOutput::files(source.files.clone()))
    }

    /// Primary input at the workspace root, secondary inputs under their artifact name
    fn workspace(&self) -> Result<FileMap, ActionError> {
        let mut workspace = FileMap::new();
        for (index, input) in self.inputs.iter().enumerate() {
            for (path, content) in input.files()? {
                let path = if index == 0 {
                    path
                } else {
                    format!("{}/{}", input.reference.artifact, path)
                };
                workspace.insert(path, content);
            }
        }
        Ok(workspace)
    }

    async fn build(&self, build: &BuildParams) -> Result<ActionOutput, ActionError> {
        let collaborators = self.engine.collaborators();
        let config = self.engine.config();

        if let Some(mutation) = &build.self_mutation {
            let role = config.expand(&mutation.role_pattern);
            if role.contains('*') {
                warn!(role = %role, "Self-mutation assumes a wildcard role pattern");
                self.log
                    .warning(format!("Assuming wildcard role pattern {}", role));
            }
            collaborators
                .credentials
                .assume(&role, &mutation.required_tags)
                .await?;
            self.log.info(format!(
                "Assumed {} with tags [{}]",
                role,
                mutation.required_tags.join(", ")
            ));
        }

        let spec = CommandSpec {
            install_commands: build.install_commands.clone(),
            commands: build.commands.clone(),
            env: self.engine.command_env(),
            base_directory: build.base_directory.clone(),
            files: build.files.clone(),
        };

        let workspace = self.workspace()?;
        let files = collaborators
            .runner
            .run(&spec, &workspace, &self.log)
            .await?;

        let mutation = match &build.self_mutation {
            Some(mutation) => Some(self.rederive(mutation)?),
            None => None,
        };

        Ok(ActionOutput {
            files: Some(files),
            mutation,
        })
    }

    /// Reads and validates the pipeline definition shipped in the input artifact
    fn rederive(&self, mutation: &SelfMutation) -> Result<ValidatedPipeline, ActionError> {
        let input = self.inputs.first().ok_or_else(|| {
            ValidationError::SelfMutationWithoutInput {
                stage: self.stage.clone(),
                action: self.action.name.clone(),
            }
        })?;

        let files = input.files()?;
        let bytes = files.get(mutation.definition_path.trim_start_matches("./")).ok_or_else(|| {
            ValidationError::Malformed(format!(
                "definition '{}' not found in artifact '{}'",
                mutation.definition_path, input.reference.artifact
            ))
        })?;

        let definition = parse_definition(&mutation.definition_path, bytes)?;
        let validated = validate(definition)?;

        for warning in validated.warnings() {
            self.log.warning(warning.clone());
        }
        self.log.info(format!(
            "Re-derived definition '{}' (digest {})",
            validated.name(),
            &validated.digest()[..12]
        ));

        Ok(validated)
    }

    async fn approval(
        &self,
        timeout_secs: Option<u64>,
        summary: Option<String>,
    ) -> Result<ActionOutput, ActionError> {
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.engine.config().approval_timeout);

        let gate = ApprovalGate::new(
            self.run.execution_id,
            &self.run.pipeline_name,
            &self.stage,
            &self.action.name,
            summary,
            chrono::Duration::from_std(timeout)
                .unwrap_or(MAX_GATE_DEADLINE)
                .min(MAX_GATE_DEADLINE),
        );

        self.log.info("Waiting for manual approval");

        let mut stop = self.run.stop.clone();
        let outcome = self
            .engine
            .approvals()
            .wait(self.engine.db(), gate, timeout, &mut stop)
            .await;

        match outcome {
            GateOutcome::Approved => {
                self.log.info("Approved");
                Ok(ActionOutput::default())
            }
            GateOutcome::Rejected { actor, comment } => {
                Err(ActionError::ApprovalRejected { actor, comment })
            }
            GateOutcome::TimedOut(timeout) => Err(ActionError::Timeout(timeout)),
            GateOutcome::Cancelled => Err(ActionError::Cancelled),
        }
    }

    async fn deploy_prepare(
        &self,
        stack_name: &str,
        change_set_name: &str,
        template: &ArtifactRef,
        capabilities: &[Capability],
        admin_permissions: bool,
        deployment_role: Option<&str>,
    ) -> Result<ActionOutput, ActionError> {
        let collaborators = self.engine.collaborators();

        if let Some(role) = deployment_role {
            let role = self.engine.config().expand(role);
            collaborators
                .credentials
                .assume(&role, &["deploy".to_string()])
                .await
                .map_err(|e| PreviewError::PermissionDenied {
                    stack: stack_name.to_string(),
                    reason: e.to_string(),
                })?;
            self.log.info(format!("Using deployment role {}", role));
        }

        if admin_permissions {
            self.log
                .warning("Change-set preparation runs with administrator permissions");
        }

        let input = self
            .inputs
            .iter()
            .find(|i| i.reference.artifact == template.artifact)
            .ok_or_else(|| PreviewError::TemplateNotFound {
                stack: stack_name.to_string(),
                path: template.to_string(),
            })?;

        let bytes = match &template.path {
            Some(path) => input.artifact.at_path(path),
            None if input.artifact.files.len() == 1 => {
                input.artifact.files.values().next().map(|c| c.as_slice())
            }
            None => None,
        }
        .ok_or_else(|| PreviewError::TemplateNotFound {
            stack: stack_name.to_string(),
            path: template.to_string(),
        })?;

        let handle = collaborators
            .change_sets
            .prepare(PrepareRequest {
                stack_name,
                change_set_name,
                template: bytes,
                capabilities,
            })
            .await?;

        for change in &handle.changes {
            self.log.info(format!(
                "{:?} {}{}",
                change.action,
                change.logical_id,
                change
                    .resource_type
                    .as_ref()
                    .map(|t| format!(" ({})", t))
                    .unwrap_or_default()
            ));
        }
        if handle.is_empty() {
            self.log.info("No changes");
        }

        self.engine
            .store_change_set(self.run.execution_id, handle)
            .await;

        Ok(ActionOutput::default())
    }

    async fn deploy_execute(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ActionOutput, ActionError> {
        let handle = self
            .engine
            .take_change_set(self.run.execution_id, stack_name, change_set_name)
            .await
            .ok_or_else(|| ApplyError::UnknownChangeSet {
                stack: stack_name.to_string(),
                change_set: change_set_name.to_string(),
            })?;

        let stack = self
            .engine
            .collaborators()
            .change_sets
            .execute(&handle)
            .await?;

        info!(stack = %stack.name, revision = stack.revision, "Change-set executed");
        self.log.info(format!(
            "Executed change-set {} on {} (now revision {})",
            change_set_name, stack.name, stack.revision
        ));

        Ok(ActionOutput::default())
    }

    async fn custom(
        &self,
        handler: &str,
        config: &serde_json::Value,
    ) -> Result<ActionOutput, ActionError> {
        let implementation = self
            .engine
            .collaborators()
            .custom
            .get(handler)
            .cloned()
            .ok_or_else(|| ActionError::Custom(format!("no handler registered for '{}'", handler)))?;

        let inputs: Vec<Arc<Artifact>> = self.inputs.iter().map(|i| Arc::clone(&i.artifact)).collect();
        let files = implementation
            .invoke(config, &inputs, &self.log)
            .await
            .map_err(ActionError::Custom)?;

        Ok(ActionOutput::files(files))
    }
}

/// Parses a definition file, TOML or JSON by extension
pub fn parse_definition(path: &str, bytes: &[u8]) -> Result<PipelineDefinition, ValidationError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ValidationError::Malformed(format!("'{}' is not UTF-8: {}", path, e)))?;

    if path.ends_with(".toml") {
        toml::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))
    } else {
        serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}
