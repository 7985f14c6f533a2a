//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Registered pipeline
///
/// The live record kept by the orchestrator. `definition` is always the
/// latest version; older versions are kept as [`PipelineVersion`] records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub digest: String,
    pub definition: PipelineDefinition,
    pub warnings: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// One immutable version of a pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineVersion {
    pub pipeline_id: Uuid,
    pub version: u32,
    pub digest: String,
    pub definition: PipelineDefinition,
    pub origin: VersionOrigin,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// What produced a definition version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionOrigin {
    /// Registered through the API
    Registered,
    /// Written by the self-mutation step of an execution
    SelfMutation { execution_id: Uuid },
}

/// How concurrent executions of one pipeline interact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// At most one execution occupies a given stage at a time
    Sequential,
    /// Executions may overlap across stages
    #[default]
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "SEQUENTIAL"),
            ExecutionMode::Parallel => write!(f, "PARALLEL"),
        }
    }
}

fn default_restart_on_update() -> bool {
    true
}

/// Declarative pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_restart_on_update")]
    pub restart_on_update: bool,
    pub stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    /// Finds a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Position of a stage in declaration order
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }
}

/// Stage definition: an ordered phase of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub actions: Vec<ActionDefinition>,
}

impl StageDefinition {
    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// Action definition: one unit of work inside a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    /// Run order inside the stage. Filled in during validation when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_order: Option<u32>,
    #[serde(default)]
    pub inputs: Vec<ArtifactRef>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleDescriptor>,
    pub params: ActionParams,
}

impl ActionDefinition {
    pub fn kind(&self) -> ActionKind {
        self.params.kind()
    }

    /// Run order, or 1 for definitions that have not been validated yet
    pub fn effective_run_order(&self) -> u32 {
        self.run_order.unwrap_or(1)
    }

    /// Every artifact reference this action reads, including kind-specific ones
    pub fn consumed_refs(&self) -> Vec<&ArtifactRef> {
        let mut refs: Vec<&ArtifactRef> = self.inputs.iter().collect();
        if let ActionParams::DeployPrepare { template, .. } = &self.params
            && !refs.iter().any(|r| *r == template)
        {
            refs.push(template);
        }
        refs
    }

    pub fn self_mutation(&self) -> Option<&SelfMutation> {
        match &self.params {
            ActionParams::Build(build) => build.self_mutation.as_ref(),
            _ => None,
        }
    }
}

/// Action category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Source,
    Build,
    Approval,
    DeployPrepare,
    DeployExecute,
    Custom,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Source => "SOURCE",
            ActionKind::Build => "BUILD",
            ActionKind::Approval => "APPROVAL",
            ActionKind::DeployPrepare => "DEPLOY_PREPARE",
            ActionKind::DeployExecute => "DEPLOY_EXECUTE",
            ActionKind::Custom => "CUSTOM",
        };
        write!(f, "{}", s)
    }
}

/// Kind-specific action parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionParams {
    /// Emits the source revision that triggered the execution
    Source {
        repository: String,
        /// Branch to track; defaults to the orchestrator's configured branch
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    /// Runs shell commands against the input artifact
    Build(BuildParams),
    /// Halts the stage until an external decision arrives
    Approval {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// Computes a change-set against the live stack without touching it
    DeployPrepare {
        stack_name: String,
        change_set_name: String,
        template: ArtifactRef,
        #[serde(default)]
        capabilities: Vec<Capability>,
        #[serde(default)]
        admin_permissions: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deployment_role: Option<String>,
    },
    /// Applies a change-set computed earlier in the same stage
    DeployExecute {
        stack_name: String,
        change_set_name: String,
    },
    /// Dispatched to a handler registered under `handler`
    Custom {
        handler: String,
        #[serde(default)]
        config: serde_json::Value,
    },
}

impl ActionParams {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionParams::Source { .. } => ActionKind::Source,
            ActionParams::Build(_) => ActionKind::Build,
            ActionParams::Approval { .. } => ActionKind::Approval,
            ActionParams::DeployPrepare { .. } => ActionKind::DeployPrepare,
            ActionParams::DeployExecute { .. } => ActionKind::DeployExecute,
            ActionParams::Custom { .. } => ActionKind::Custom,
        }
    }
}

/// Build parameters, shaped like a two-phase build spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildParams {
    #[serde(default)]
    pub install_commands: Vec<String>,
    pub commands: Vec<String>,
    /// Directory (relative to the workspace) the output artifact is taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<String>,
    /// Glob patterns selecting output files; empty means everything
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_mutation: Option<SelfMutation>,
}

/// Marks a build as the pipeline's self-mutation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfMutation {
    /// Path of the pipeline definition inside the build's input artifact
    pub definition_path: String,
    /// Role pattern assumed before updating the pipeline
    pub role_pattern: String,
    #[serde(default)]
    pub required_tags: Vec<String>,
    /// Extra read permissions granted to the step
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Capabilities acknowledged when preparing a change-set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    AnonymousIam,
    NamedIam,
    AutoExpand,
}

/// Abstract role/permission descriptor attached to an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Reference to a declared artifact, optionally addressing a path inside it
///
/// Written as `name` or `name::sub/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef {
    pub artifact: String,
    pub path: Option<String>,
}

impl ArtifactRef {
    pub fn new(artifact: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            path: None,
        }
    }

    /// Addresses a path inside this artifact
    pub fn at_path(&self, path: impl Into<String>) -> Self {
        Self {
            artifact: self.artifact.clone(),
            path: Some(path.into()),
        }
    }
}

impl FromStr for ArtifactRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (artifact, path) = match s.split_once("::") {
            Some((artifact, path)) => (artifact.trim(), Some(path.trim())),
            None => (s.trim(), None),
        };

        if artifact.is_empty() {
            return Err(format!("artifact reference '{}' has no artifact name", s));
        }

        let path = match path {
            Some(p) if p.trim_matches('/').is_empty() => {
                return Err(format!("artifact reference '{}' has an empty path", s));
            }
            Some(p) => Some(p.trim_matches('/').to_string()),
            None => None,
        };

        Ok(Self {
            artifact: artifact.to_string(),
            path,
        })
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArtifactRef> for String {
    fn from(value: ArtifactRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}::{}", self.artifact, path),
            None => write!(f, "{}", self.artifact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_ref_parse() {
        let plain: ArtifactRef = "synth".parse().unwrap();
        assert_eq!(plain.artifact, "synth");
        assert_eq!(plain.path, None);

        let nested: ArtifactRef = "synth::assembly/SQSStack.template.json".parse().unwrap();
        assert_eq!(nested.artifact, "synth");
        assert_eq!(
            nested.path.as_deref(),
            Some("assembly/SQSStack.template.json")
        );
        assert_eq!(nested.to_string(), "synth::assembly/SQSStack.template.json");
    }

    #[test]
    fn test_artifact_ref_rejects_empty_parts() {
        assert!("".parse::<ArtifactRef>().is_err());
        assert!("::file.json".parse::<ArtifactRef>().is_err());
        assert!("synth::/".parse::<ArtifactRef>().is_err());
    }

    #[test]
    fn test_action_params_json_shape() {
        let json = serde_json::json!({
            "name": "ApproveChanges",
            "run_order": 2,
            "params": { "kind": "APPROVAL", "timeout_secs": 60 }
        });

        let action: ActionDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(action.kind(), ActionKind::Approval);
        assert_eq!(action.run_order, Some(2));
        assert!(action.inputs.is_empty());
    }

    #[test]
    fn test_deploy_prepare_consumes_template() {
        let action = ActionDefinition {
            name: "PrepareChanges".to_string(),
            run_order: Some(1),
            inputs: vec![],
            outputs: vec![],
            role: None,
            params: ActionParams::DeployPrepare {
                stack_name: "SQSStack2".to_string(),
                change_set_name: "cdkchangeset".to_string(),
                template: "synth::app/SQSStack.template.json".parse().unwrap(),
                capabilities: vec![Capability::NamedIam],
                admin_permissions: true,
                deployment_role: None,
            },
        };

        let refs = action.consumed_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].artifact, "synth");
    }

    #[test]
    fn test_definition_defaults() {
        let json = serde_json::json!({ "name": "p", "stages": [] });
        let def: PipelineDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.mode, ExecutionMode::Parallel);
        assert!(def.restart_on_update);
    }
}
