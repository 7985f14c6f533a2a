//! Pipeline definition validation
//!
//! Pure checks with no I/O. A definition that passes becomes a
//! [`ValidatedPipeline`]: run orders are filled in, every consumed artifact
//! reference is resolved to its producing action, and the content digest used
//! for versioning is computed.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::artifact::ActionAddress;
use crate::domain::pipeline::{
    ActionDefinition, ActionKind, ActionParams, ArtifactRef, PipelineDefinition, StageDefinition,
};
use crate::error::ValidationError;

/// An input reference resolved against its producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub reference: ArtifactRef,
    pub producer: ActionAddress,
}

/// Actions sharing one run order inside a stage
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    pub run_order: u32,
    pub actions: Vec<&'a ActionDefinition>,
}

/// A definition that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedPipeline {
    definition: PipelineDefinition,
    digest: String,
    warnings: Vec<String>,
    inputs: HashMap<ActionAddress, Vec<ResolvedInput>>,
    self_mutation_stage: Option<String>,
}

impl ValidatedPipeline {
    /// Normalized definition (every action has a run order)
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn into_definition(self) -> PipelineDefinition {
        self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Non-fatal findings worth a review
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Resolved inputs of an action, in declaration order
    pub fn inputs_of(&self, stage: &str, action: &str) -> &[ResolvedInput] {
        self.inputs
            .get(&ActionAddress::new(stage, action))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Name of the stage holding the self-mutation step
    pub fn self_mutation_stage(&self) -> Option<&str> {
        self.self_mutation_stage.as_deref()
    }

    /// Partitions of a stage in ascending run order
    pub fn partitions(&self, stage: &str) -> Vec<Partition<'_>> {
        self.definition
            .stage(stage)
            .map(partition_by_run_order)
            .unwrap_or_default()
    }
}

/// Groups a stage's actions by run order, ascending
///
/// Declaration order is kept inside each partition.
pub fn partition_by_run_order(stage: &StageDefinition) -> Vec<Partition<'_>> {
    let mut groups: BTreeMap<u32, Vec<&ActionDefinition>> = BTreeMap::new();
    for action in &stage.actions {
        groups
            .entry(action.effective_run_order())
            .or_default()
            .push(action);
    }

    groups
        .into_iter()
        .map(|(run_order, actions)| Partition { run_order, actions })
        .collect()
}

/// SHA-256 over the canonical JSON form of a definition
pub fn definition_digest(definition: &PipelineDefinition) -> String {
    let bytes = serde_json::to_vec(definition).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Validates a pipeline definition
///
/// # Errors
/// Returns the first [`ValidationError`] found, naming the offending stage
/// and action.
pub fn validate(definition: PipelineDefinition) -> Result<ValidatedPipeline, ValidationError> {
    let mut definition = definition;

    if definition.name.trim().is_empty() {
        return Err(ValidationError::EmptyPipelineName);
    }

    if definition.stages.is_empty() {
        return Err(ValidationError::NoStages(definition.name.clone()));
    }

    check_names(&definition)?;
    fill_run_orders(&mut definition)?;

    let mut warnings = Vec::new();
    let mut inputs = HashMap::new();
    let mut producers: HashMap<String, ActionAddress> = HashMap::new();
    let mut self_mutation: Option<(usize, String)> = None;

    for (stage_idx, stage) in definition.stages.iter().enumerate() {
        for partition in partition_by_run_order(stage) {
            // Inputs resolve only against strictly earlier producers
            for action in &partition.actions {
                let address = ActionAddress::new(&stage.name, &action.name);
                let mut resolved = Vec::new();
                for reference in action.consumed_refs() {
                    let producer = producers.get(&reference.artifact).ok_or_else(|| {
                        ValidationError::UnresolvedInput {
                            stage: stage.name.clone(),
                            action: action.name.clone(),
                            artifact: reference.artifact.clone(),
                        }
                    })?;
                    resolved.push(ResolvedInput {
                        reference: reference.clone(),
                        producer: producer.clone(),
                    });
                }
                inputs.insert(address, resolved);
            }

            for action in &partition.actions {
                check_action(stage_idx, stage, action, &mut warnings)?;

                if let Some(mutation) = action.self_mutation() {
                    if self_mutation.is_some() {
                        return Err(ValidationError::MultipleSelfMutations {
                            stage: stage.name.clone(),
                            action: action.name.clone(),
                        });
                    }
                    if mutation.role_pattern.contains('*') {
                        warnings.push(format!(
                            "Stage '{}': self-mutation action '{}' assumes roles matching the wildcard pattern '{}'; flag for security review",
                            stage.name, action.name, mutation.role_pattern
                        ));
                    }
                    self_mutation = Some((stage_idx, stage.name.clone()));
                }

                for output in &action.outputs {
                    if producers.contains_key(output) {
                        return Err(ValidationError::DuplicateArtifact {
                            stage: stage.name.clone(),
                            action: action.name.clone(),
                            artifact: output.clone(),
                        });
                    }
                    producers.insert(
                        output.clone(),
                        ActionAddress::new(&stage.name, &action.name),
                    );
                }
            }
        }

        check_prepare_before_execute(stage)?;
    }

    check_first_stage_source(&definition)?;

    if let Some((mutation_idx, mutation_stage)) = &self_mutation {
        for stage in definition.stages.iter().take(mutation_idx + 1) {
            if let Some(action) = stage.actions.iter().find(|a| is_deploy(a.kind())) {
                return Err(ValidationError::DeployBeforeSelfMutation {
                    stage: stage.name.clone(),
                    action: action.name.clone(),
                    mutation_stage: mutation_stage.clone(),
                });
            }
        }
    }

    let digest = definition_digest(&definition);

    Ok(ValidatedPipeline {
        definition,
        digest,
        warnings,
        inputs,
        self_mutation_stage: self_mutation.map(|(_, name)| name),
    })
}

fn is_deploy(kind: ActionKind) -> bool {
    matches!(kind, ActionKind::DeployPrepare | ActionKind::DeployExecute)
}

fn check_names(definition: &PipelineDefinition) -> Result<(), ValidationError> {
    let mut stage_names = HashSet::new();

    for (index, stage) in definition.stages.iter().enumerate() {
        if stage.name.trim().is_empty() {
            return Err(ValidationError::EmptyStageName { index });
        }
        if !stage_names.insert(stage.name.as_str()) {
            return Err(ValidationError::DuplicateStage {
                stage: stage.name.clone(),
            });
        }
        if stage.actions.is_empty() {
            return Err(ValidationError::EmptyStage {
                stage: stage.name.clone(),
            });
        }

        let mut action_names = HashSet::new();
        for (index, action) in stage.actions.iter().enumerate() {
            if action.name.trim().is_empty() {
                return Err(ValidationError::EmptyActionName {
                    stage: stage.name.clone(),
                    index,
                });
            }
            if !action_names.insert(action.name.as_str()) {
                return Err(ValidationError::DuplicateAction {
                    stage: stage.name.clone(),
                    action: action.name.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Omitted run orders default to the previous action's run order plus one
fn fill_run_orders(definition: &mut PipelineDefinition) -> Result<(), ValidationError> {
    for stage in &mut definition.stages {
        let mut previous = 0u32;
        for action in &mut stage.actions {
            let run_order = match action.run_order {
                Some(0) => {
                    return Err(ValidationError::InvalidRunOrder {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
                Some(n) => n,
                None => previous.checked_add(1).ok_or_else(|| {
                    ValidationError::RunOrderOverflow {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                        previous,
                    }
                })?,
            };
            action.run_order = Some(run_order);
            previous = run_order;
        }
    }
    Ok(())
}

fn check_action(
    stage_idx: usize,
    stage: &StageDefinition,
    action: &ActionDefinition,
    warnings: &mut Vec<String>,
) -> Result<(), ValidationError> {
    match &action.params {
        ActionParams::Source { .. } if stage_idx != 0 => Err(ValidationError::MisplacedSource {
            stage: stage.name.clone(),
            action: action.name.clone(),
        }),
        ActionParams::Approval { .. } if !action.outputs.is_empty() => {
            Err(ValidationError::ApprovalWithOutputs {
                stage: stage.name.clone(),
                action: action.name.clone(),
            })
        }
        ActionParams::Build(build) => {
            if build.self_mutation.is_some() {
                if stage_idx == 0 {
                    return Err(ValidationError::SelfMutationInFirstStage {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
                if action.inputs.is_empty() {
                    return Err(ValidationError::SelfMutationWithoutInput {
                        stage: stage.name.clone(),
                        action: action.name.clone(),
                    });
                }
            } else if build.commands.is_empty() {
                return Err(ValidationError::EmptyBuild {
                    stage: stage.name.clone(),
                    action: action.name.clone(),
                });
            }
            Ok(())
        }
        ActionParams::DeployPrepare {
            stack_name,
            admin_permissions: true,
            ..
        } => {
            warnings.push(format!(
                "Stage '{}': action '{}' prepares stack '{}' with admin permissions",
                stage.name, action.name, stack_name
            ));
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_prepare_before_execute(stage: &StageDefinition) -> Result<(), ValidationError> {
    for action in &stage.actions {
        let ActionParams::DeployExecute {
            stack_name,
            change_set_name,
        } = &action.params
        else {
            continue;
        };

        let prepared = stage.actions.iter().any(|other| {
            other.effective_run_order() < action.effective_run_order()
                && matches!(
                    &other.params,
                    ActionParams::DeployPrepare {
                        stack_name: s,
                        change_set_name: c,
                        ..
                    } if s == stack_name && c == change_set_name
                )
        });

        if !prepared {
            return Err(ValidationError::ExecuteWithoutPrepare {
                stage: stage.name.clone(),
                action: action.name.clone(),
                stack_name: stack_name.clone(),
                change_set_name: change_set_name.clone(),
            });
        }
    }
    Ok(())
}

fn check_first_stage_source(definition: &PipelineDefinition) -> Result<(), ValidationError> {
    let first = &definition.stages[0];
    let has_source = first
        .actions
        .iter()
        .any(|a| a.kind() == ActionKind::Source && !a.outputs.is_empty());

    if !has_source {
        return Err(ValidationError::MissingSource {
            stage: first.name.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{BuildParams, ExecutionMode, SelfMutation};

    fn action(name: &str, run_order: Option<u32>, params: ActionParams) -> ActionDefinition {
        ActionDefinition {
            name: name.to_string(),
            run_order,
            inputs: vec![],
            outputs: vec![],
            role: None,
            params,
        }
    }

    fn source() -> ActionDefinition {
        ActionDefinition {
            outputs: vec!["source".to_string()],
            ..action(
                "CodeCommit",
                None,
                ActionParams::Source {
                    repository: "v2pipeline".to_string(),
                    branch: Some("main".to_string()),
                },
            )
        }
    }

    fn build(name: &str, input: &str, output: Option<&str>) -> ActionDefinition {
        ActionDefinition {
            inputs: vec![input.parse().unwrap()],
            outputs: output.map(|o| vec![o.to_string()]).unwrap_or_default(),
            ..action(
                name,
                None,
                ActionParams::Build(BuildParams {
                    install_commands: vec![],
                    commands: vec!["npm ci".to_string()],
                    base_directory: None,
                    files: vec![],
                    self_mutation: None,
                }),
            )
        }
    }

    fn self_mutate(input: &str) -> ActionDefinition {
        ActionDefinition {
            inputs: vec![input.parse().unwrap()],
            ..action(
                "SelfMutate",
                None,
                ActionParams::Build(BuildParams {
                    install_commands: vec![],
                    commands: vec![],
                    base_directory: None,
                    files: vec![],
                    self_mutation: Some(SelfMutation {
                        definition_path: "pipeline.json".to_string(),
                        role_pattern: "arn:*:iam::123456789012:role/*".to_string(),
                        required_tags: vec!["deploy".to_string()],
                        permissions: vec![],
                    }),
                }),
            )
        }
    }

    fn deploy_actions() -> Vec<ActionDefinition> {
        vec![
            action(
                "PrepareChanges",
                Some(1),
                ActionParams::DeployPrepare {
                    stack_name: "SQSStack2".to_string(),
                    change_set_name: "cdkchangeset".to_string(),
                    template: "synth::App/SQSStack.template.json".parse().unwrap(),
                    capabilities: vec![],
                    admin_permissions: false,
                    deployment_role: None,
                },
            ),
            action(
                "ApproveChanges",
                Some(2),
                ActionParams::Approval {
                    timeout_secs: None,
                    summary: None,
                },
            ),
            action(
                "ExecuteChanges",
                Some(3),
                ActionParams::DeployExecute {
                    stack_name: "SQSStack2".to_string(),
                    change_set_name: "cdkchangeset".to_string(),
                },
            ),
        ]
    }

    fn stage(name: &str, actions: Vec<ActionDefinition>) -> StageDefinition {
        StageDefinition {
            name: name.to_string(),
            actions,
        }
    }

    fn full_pipeline() -> PipelineDefinition {
        PipelineDefinition {
            name: "V2Pipeline".to_string(),
            mode: ExecutionMode::Parallel,
            restart_on_update: true,
            stages: vec![
                stage("Source", vec![source()]),
                stage("Build", vec![build("Synth", "source", Some("synth"))]),
                stage("UpdatePipeline", vec![self_mutate("synth")]),
                stage("Deploy", deploy_actions()),
            ],
        }
    }

    #[test]
    fn test_valid_pipeline() {
        let validated = validate(full_pipeline()).unwrap();
        assert_eq!(validated.self_mutation_stage(), Some("UpdatePipeline"));
        assert_eq!(validated.warnings().len(), 1);
        assert!(validated.warnings()[0].contains("security review"));

        let inputs = validated.inputs_of("Deploy", "PrepareChanges");
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].producer, ActionAddress::new("Build", "Synth"));
        assert_eq!(
            inputs[0].reference.path.as_deref(),
            Some("App/SQSStack.template.json")
        );
    }

    #[test]
    fn test_run_orders_default_monotonic() {
        let mut def = full_pipeline();
        def.stages[1]
            .actions
            .push(build("Lint", "source", Some("lint")));
        def.stages[1].actions.push(ActionDefinition {
            run_order: Some(5),
            ..build("Test", "source", None)
        });
        def.stages[1]
            .actions
            .push(build("Report", "lint", None));

        let validated = validate(def).unwrap();
        let orders: Vec<u32> = validated.definition().stages[1]
            .actions
            .iter()
            .map(|a| a.run_order.unwrap())
            .collect();
        assert_eq!(orders, vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_partitions_ascending() {
        let mut def = full_pipeline();
        def.stages[1].actions = vec![
            ActionDefinition {
                run_order: Some(2),
                ..build("B", "source", None)
            },
            ActionDefinition {
                run_order: Some(1),
                ..build("A1", "source", None)
            },
            ActionDefinition {
                run_order: Some(1),
                ..build("A2", "source", Some("synth"))
            },
        ];

        let validated = validate(def).unwrap();
        let partitions = validated.partitions("Build");
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].run_order, 1);
        let names: Vec<&str> = partitions[0].actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["A1", "A2"]);
        assert_eq!(partitions[1].actions[0].name, "B");
    }

    #[test]
    fn test_duplicate_stage() {
        let mut def = full_pipeline();
        def.stages[2].name = "Build".to_string();
        assert_eq!(
            validate(def).unwrap_err(),
            ValidationError::DuplicateStage {
                stage: "Build".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_action() {
        let mut def = full_pipeline();
        def.stages[1].actions.push(build("Synth", "source", None));
        assert!(matches!(
            validate(def),
            Err(ValidationError::DuplicateAction { stage, action }) if stage == "Build" && action == "Synth"
        ));
    }

    #[test]
    fn test_input_from_later_stage_rejected() {
        let mut def = full_pipeline();
        def.stages[1].actions[0].inputs = vec!["synth".parse().unwrap()];
        let err = validate(def).unwrap_err();
        assert!(matches!(err, ValidationError::UnresolvedInput { ref artifact, .. } if artifact == "synth"));
        assert_eq!(err.stage(), Some("Build"));
    }

    #[test]
    fn test_input_from_same_run_order_rejected() {
        let mut def = full_pipeline();
        def.stages[1].actions = vec![
            ActionDefinition {
                run_order: Some(1),
                ..build("Synth", "source", Some("synth"))
            },
            ActionDefinition {
                run_order: Some(1),
                ..build("Package", "synth", None)
            },
        ];
        assert!(matches!(
            validate(def),
            Err(ValidationError::UnresolvedInput { action, .. }) if action == "Package"
        ));
    }

    #[test]
    fn test_input_from_lower_run_order_accepted() {
        let mut def = full_pipeline();
        def.stages[1]
            .actions
            .push(build("Package", "synth", Some("package")));
        assert!(validate(def).is_ok());
    }

    #[test]
    fn test_missing_source() {
        let mut def = full_pipeline();
        def.stages[0].actions[0].outputs.clear();
        assert!(matches!(
            validate(def),
            Err(ValidationError::UnresolvedInput { .. }) | Err(ValidationError::MissingSource { .. })
        ));

        let def = PipelineDefinition {
            stages: vec![stage("Build", vec![build("Synth", "source", None)])],
            ..full_pipeline()
        };
        assert!(validate(def).is_err());
    }

    #[test]
    fn test_source_only_first_stage() {
        let mut def = full_pipeline();
        def.stages[1].actions.push(ActionDefinition {
            outputs: vec!["other".to_string()],
            ..action(
                "Second",
                None,
                ActionParams::Source {
                    repository: "x".to_string(),
                    branch: None,
                },
            )
        });
        assert!(matches!(
            validate(def),
            Err(ValidationError::MisplacedSource { .. })
        ));
    }

    #[test]
    fn test_execute_requires_prepare() {
        let mut def = full_pipeline();
        def.stages[3].actions.remove(0);
        assert!(matches!(
            validate(def),
            Err(ValidationError::ExecuteWithoutPrepare { .. })
        ));
    }

    #[test]
    fn test_deploy_before_self_mutation_rejected() {
        let mut def = full_pipeline();
        def.stages.swap(2, 3);
        assert!(matches!(
            validate(def),
            Err(ValidationError::DeployBeforeSelfMutation { mutation_stage, .. }) if mutation_stage == "UpdatePipeline"
        ));
    }

    #[test]
    fn test_zero_run_order_rejected() {
        let mut def = full_pipeline();
        def.stages[1].actions[0].run_order = Some(0);
        assert!(matches!(
            validate(def),
            Err(ValidationError::InvalidRunOrder { .. })
        ));
    }

    #[test]
    fn test_defaulted_run_order_after_max_rejected() {
        let mut def = full_pipeline();
        def.stages[1].actions[0].run_order = Some(u32::MAX);
        def.stages[1]
            .actions
            .push(build("Lint", "source", Some("lint")));

        match validate(def) {
            Err(ValidationError::RunOrderOverflow {
                stage,
                action,
                previous,
            }) => {
                assert_eq!(stage, "Build");
                assert_eq!(action, "Lint");
                assert_eq!(previous, u32::MAX);
            }
            other => panic!("expected overflow error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_digest_stable_and_content_sensitive() {
        let a = validate(full_pipeline()).unwrap();
        let b = validate(full_pipeline()).unwrap();
        assert_eq!(a.digest(), b.digest());

        let mut changed = full_pipeline();
        changed.stages[1].actions[0].name = "Synthesize".to_string();
        let c = validate(changed).unwrap();
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_sample_definition_validates() {
        let text = include_str!("../../pipelines/v2pipeline.toml");
        let def: PipelineDefinition = toml::from_str(text).unwrap();
        let validated = validate(def).unwrap();
        assert_eq!(validated.definition().stages.len(), 4);
        assert_eq!(validated.self_mutation_stage(), Some("UpdatePipeline"));
    }
}
