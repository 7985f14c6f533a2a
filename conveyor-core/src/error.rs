//! Error taxonomy shared by the engine and its collaborators

use thiserror::Error;

/// Static definition error, raised before any execution starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Pipeline definition is malformed: {0}")]
    Malformed(String),

    #[error("Pipeline name cannot be empty")]
    EmptyPipelineName,

    #[error("Pipeline '{0}' has no stages")]
    NoStages(String),

    #[error("Stage #{index} has an empty name")]
    EmptyStageName { index: usize },

    #[error("Stage '{stage}' is declared more than once")]
    DuplicateStage { stage: String },

    #[error("Stage '{stage}' has no actions")]
    EmptyStage { stage: String },

    #[error("Stage '{stage}': action #{index} has an empty name")]
    EmptyActionName { stage: String, index: usize },

    #[error("Stage '{stage}': action '{action}' is declared more than once")]
    DuplicateAction { stage: String, action: String },

    #[error("Stage '{stage}': action '{action}' has run order 0 (must be >= 1)")]
    InvalidRunOrder { stage: String, action: String },

    #[error("Stage '{stage}': action '{action}' follows run order {previous}, which has no successor")]
    RunOrderOverflow {
        stage: String,
        action: String,
        previous: u32,
    },

    #[error(
        "Stage '{stage}': action '{action}' consumes artifact '{artifact}', which is not produced by an earlier stage or a lower run order"
    )]
    UnresolvedInput {
        stage: String,
        action: String,
        artifact: String,
    },

    #[error("Stage '{stage}': action '{action}' produces artifact '{artifact}', which is already produced elsewhere")]
    DuplicateArtifact {
        stage: String,
        action: String,
        artifact: String,
    },

    #[error("First stage '{stage}' must contain a SOURCE action that produces an artifact")]
    MissingSource { stage: String },

    #[error("Stage '{stage}': SOURCE action '{action}' is only allowed in the first stage")]
    MisplacedSource { stage: String, action: String },

    #[error("Stage '{stage}': APPROVAL action '{action}' cannot declare outputs")]
    ApprovalWithOutputs { stage: String, action: String },

    #[error(
        "Stage '{stage}': DEPLOY_EXECUTE action '{action}' has no DEPLOY_PREPARE for stack '{stack_name}' / change-set '{change_set_name}' at a lower run order"
    )]
    ExecuteWithoutPrepare {
        stage: String,
        action: String,
        stack_name: String,
        change_set_name: String,
    },

    #[error("Stage '{stage}': self-mutation action '{action}' cannot run in the first stage")]
    SelfMutationInFirstStage { stage: String, action: String },

    #[error("Stage '{stage}': action '{action}' is a second self-mutation step")]
    MultipleSelfMutations { stage: String, action: String },

    #[error("Stage '{stage}': action '{action}' needs an input artifact for self-mutation")]
    SelfMutationWithoutInput { stage: String, action: String },

    #[error(
        "Stage '{stage}': deploy action '{action}' must run after the self-mutation stage '{mutation_stage}'"
    )]
    DeployBeforeSelfMutation {
        stage: String,
        action: String,
        mutation_stage: String,
    },

    #[error("Stage '{stage}': BUILD action '{action}' has no commands")]
    EmptyBuild { stage: String, action: String },
}

impl ValidationError {
    /// Stage named by the error, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            ValidationError::Malformed(_)
            | ValidationError::EmptyPipelineName
            | ValidationError::NoStages(_)
            | ValidationError::EmptyStageName { .. } => None,
            ValidationError::DuplicateStage { stage }
            | ValidationError::EmptyStage { stage }
            | ValidationError::MissingSource { stage }
            | ValidationError::EmptyActionName { stage, .. }
            | ValidationError::DuplicateAction { stage, .. }
            | ValidationError::InvalidRunOrder { stage, .. }
            | ValidationError::RunOrderOverflow { stage, .. }
            | ValidationError::UnresolvedInput { stage, .. }
            | ValidationError::DuplicateArtifact { stage, .. }
            | ValidationError::MisplacedSource { stage, .. }
            | ValidationError::ApprovalWithOutputs { stage, .. }
            | ValidationError::ExecuteWithoutPrepare { stage, .. }
            | ValidationError::SelfMutationInFirstStage { stage, .. }
            | ValidationError::MultipleSelfMutations { stage, .. }
            | ValidationError::SelfMutationWithoutInput { stage, .. }
            | ValidationError::DeployBeforeSelfMutation { stage, .. }
            | ValidationError::EmptyBuild { stage, .. } => Some(stage),
        }
    }
}

/// Build or synth command failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("command '{command}' exited with code {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        /// Tail of the captured output
        log_tail: String,
    },

    #[error("failed to spawn command '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("output directory '{0}' does not exist after the build")]
    MissingOutput(String),

    #[error("invalid output pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("workspace error: {0}")]
    Workspace(String),
}

/// Failure while computing a change-set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreviewError {
    #[error("template for stack '{stack}' is malformed: {reason}")]
    MalformedTemplate { stack: String, reason: String },

    #[error("template for stack '{stack}' not found at '{path}'")]
    TemplateNotFound { stack: String, path: String },

    #[error("insufficient permission to prepare changes for stack '{stack}': {reason}")]
    PermissionDenied { stack: String, reason: String },

    #[error("stack '{stack}' requires capability {capability} which was not acknowledged")]
    MissingCapability { stack: String, capability: String },
}

/// Failure while applying a change-set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error(
        "change-set for stack '{stack}' was computed against revision {expected} but the stack is at revision {actual}; recompute it"
    )]
    Drift {
        stack: String,
        expected: u64,
        actual: u64,
    },

    #[error("change-set '{change_set}' for stack '{stack}' does not exist or was already used")]
    UnknownChangeSet { stack: String, change_set: String },

    #[error("apply failed for stack '{stack}': {reason}")]
    Failed { stack: String, reason: String },
}

/// Credential issuance refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("role '{role}' may not be assumed: missing tag(s) {missing:?}")]
    MissingTags { role: String, missing: Vec<String> },

    #[error("role '{role}' is outside account '{account}'")]
    WrongAccount { role: String, account: String },

    #[error("permission denied for role '{role}': {reason}")]
    Denied { role: String, reason: String },
}
