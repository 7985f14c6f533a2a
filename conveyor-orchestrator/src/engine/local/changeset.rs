//! Local change-set engine
//!
//! Keeps live stack state in memory. Templates are JSON documents with a
//! top-level `Resources` object; each resource is tracked by logical id and
//! the digest of its declaration.
//!
//! Applies are serialized behind one lock, and a change-set only applies to
//! the revision it was computed against.

use async_trait::async_trait;
use conveyor_core::domain::changeset::{ChangeAction, ChangeSetHandle, ResourceChange, StackState};
use conveyor_core::domain::pipeline::Capability;
use conveyor_core::{ApplyError, PreviewError};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::collaborators::{ChangeSetEngine, PrepareRequest};

/// IAM resource properties that give the resource a custom name
const IAM_NAME_PROPERTIES: &[&str] = &[
    "RoleName",
    "UserName",
    "GroupName",
    "PolicyName",
    "ManagedPolicyName",
    "InstanceProfileName",
];

struct Prepared {
    handle: ChangeSetHandle,
    resources: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    stacks: HashMap<String, StackState>,
    prepared: HashMap<Uuid, Prepared>,
}

#[derive(Default)]
pub struct LocalChangeSetEngine {
    state: Mutex<State>,
}

impl LocalChangeSetEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change made outside any change-set, moving the stack to a
    /// new revision.
    pub async fn record_external_change(&self, stack_name: &str, logical_id: &str) -> u64 {
        let mut state = self.state.lock().await;
        let stack = state
            .stacks
            .entry(stack_name.to_string())
            .or_insert_with(|| StackState::empty(stack_name));

        stack
            .resources
            .insert(logical_id.to_string(), "external".to_string());
        stack.revision += 1;
        stack.updated_at = Some(chrono::Utc::now());

        warn!(stack = stack_name, revision = stack.revision, "Stack changed outside the pipeline");
        stack.revision
    }

    /// Number of prepared change-sets not yet executed or discarded
    pub async fn pending_change_sets(&self) -> usize {
        self.state.lock().await.prepared.len()
    }
}

/// Parsed template: resources by logical id with their declaration digest and type
struct ParsedTemplate {
    digest: String,
    resources: BTreeMap<String, (String, Option<String>)>,
    required: Vec<Capability>,
}

fn parse_template(stack: &str, bytes: &[u8]) -> Result<ParsedTemplate, PreviewError> {
    let malformed = |reason: String| PreviewError::MalformedTemplate {
        stack: stack.to_string(),
        reason,
    };

    let template: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;

    let object = template
        .as_object()
        .ok_or_else(|| malformed("template is not a JSON object".to_string()))?;

    let mut resources = BTreeMap::new();
    let mut required = Vec::new();

    if let Some(declared) = object.get("Resources") {
        let declared = declared
            .as_object()
            .ok_or_else(|| malformed("'Resources' is not an object".to_string()))?;

        for (logical_id, declaration) in declared {
            let resource_type = declaration
                .get("Type")
                .and_then(|t| t.as_str())
                .map(String::from);

            if let Some(kind) = &resource_type {
                if kind.starts_with("AWS::IAM::") {
                    let named = declaration
                        .get("Properties")
                        .and_then(|p| p.as_object())
                        .is_some_and(|p| IAM_NAME_PROPERTIES.iter().any(|n| p.contains_key(*n)));
                    let capability = if named {
                        Capability::NamedIam
                    } else {
                        Capability::AnonymousIam
                    };
                    if !required.contains(&capability) {
                        required.push(capability);
                    }
                }
            }

            let digest = hex::encode(Sha256::digest(declaration.to_string().as_bytes()));
            resources.insert(logical_id.clone(), (digest, resource_type));
        }
    }

    if object.contains_key("Transform") {
        required.push(Capability::AutoExpand);
    }

    Ok(ParsedTemplate {
        digest: hex::encode(Sha256::digest(bytes)),
        resources,
        required,
    })
}

fn acknowledged(required: Capability, acknowledged: &[Capability]) -> bool {
    match required {
        // Named IAM acknowledgement covers anonymous IAM resources too
        Capability::AnonymousIam => {
            acknowledged.contains(&Capability::AnonymousIam)
                || acknowledged.contains(&Capability::NamedIam)
        }
        other => acknowledged.contains(&other),
    }
}

#[async_trait]
impl ChangeSetEngine for LocalChangeSetEngine {
    async fn prepare(&self, request: PrepareRequest<'_>) -> Result<ChangeSetHandle, PreviewError> {
        let parsed = parse_template(request.stack_name, request.template)?;

        if let Some(missing) = parsed
            .required
            .iter()
            .find(|c| !acknowledged(**c, request.capabilities))
        {
            return Err(PreviewError::MissingCapability {
                stack: request.stack_name.to_string(),
                capability: format!("{:?}", missing),
            });
        }

        let mut state = self.state.lock().await;
        let live = state
            .stacks
            .get(request.stack_name)
            .cloned()
            .unwrap_or_else(|| StackState::empty(request.stack_name));

        let mut changes = Vec::new();
        for (logical_id, (digest, resource_type)) in &parsed.resources {
            let action = match live.resources.get(logical_id) {
                None => Some(ChangeAction::Add),
                Some(current) if current != digest => Some(ChangeAction::Modify),
                Some(_) => None,
            };
            if let Some(action) = action {
                changes.push(ResourceChange {
                    logical_id: logical_id.clone(),
                    action,
                    resource_type: resource_type.clone(),
                });
            }
        }
        for logical_id in live.resources.keys() {
            if !parsed.resources.contains_key(logical_id) {
                changes.push(ResourceChange {
                    logical_id: logical_id.clone(),
                    action: ChangeAction::Remove,
                    resource_type: None,
                });
            }
        }

        let handle = ChangeSetHandle {
            id: Uuid::new_v4(),
            stack_name: request.stack_name.to_string(),
            change_set_name: request.change_set_name.to_string(),
            base_revision: live.revision,
            template_digest: parsed.digest,
            changes,
            created_at: chrono::Utc::now(),
        };

        info!(
            stack = request.stack_name,
            change_set = request.change_set_name,
            base_revision = handle.base_revision,
            changes = handle.changes.len(),
            "Prepared change-set"
        );

        let resources = parsed
            .resources
            .into_iter()
            .map(|(id, (digest, _))| (id, digest))
            .collect();

        state.prepared.insert(
            handle.id,
            Prepared {
                handle: handle.clone(),
                resources,
            },
        );

        Ok(handle)
    }

    async fn execute(&self, handle: &ChangeSetHandle) -> Result<StackState, ApplyError> {
        let mut state = self.state.lock().await;

        // Executed or drifted handles are gone for good
        let prepared = state
            .prepared
            .remove(&handle.id)
            .ok_or_else(|| ApplyError::UnknownChangeSet {
                stack: handle.stack_name.clone(),
                change_set: handle.change_set_name.clone(),
            })?;

        let stack = state
            .stacks
            .entry(handle.stack_name.clone())
            .or_insert_with(|| StackState::empty(&handle.stack_name));

        if stack.revision != prepared.handle.base_revision {
            return Err(ApplyError::Drift {
                stack: handle.stack_name.clone(),
                expected: prepared.handle.base_revision,
                actual: stack.revision,
            });
        }

        stack.resources = prepared.resources;
        stack.template_digest = Some(prepared.handle.template_digest.clone());
        stack.revision += 1;
        stack.last_change_set = Some(handle.id);
        stack.updated_at = Some(chrono::Utc::now());

        debug!(stack = %stack.name, revision = stack.revision, "Applied change-set");
        Ok(stack.clone())
    }

    async fn discard(&self, handle: &ChangeSetHandle) -> bool {
        let removed = self.state.lock().await.prepared.remove(&handle.id).is_some();
        if removed {
            debug!(
                stack = %handle.stack_name,
                change_set = %handle.change_set_name,
                "Discarded change-set"
            );
        }
        removed
    }

    async fn stacks(&self) -> Vec<StackState> {
        let state = self.state.lock().await;
        let mut stacks: Vec<StackState> = state.stacks.values().cloned().collect();
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        stacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE_TEMPLATE: &str = r#"{
        "Resources": {
            "Queue": { "Type": "AWS::SQS::Queue", "Properties": { "VisibilityTimeout": 300 } }
        }
    }"#;

    fn request<'a>(template: &'a str, capabilities: &'a [Capability]) -> PrepareRequest<'a> {
        PrepareRequest {
            stack_name: "SQSStack2",
            change_set_name: "cdkchangeset",
            template: template.as_bytes(),
            capabilities,
        }
    }

    #[tokio::test]
    async fn test_prepare_then_execute() {
        let engine = LocalChangeSetEngine::new();

        let handle = engine.prepare(request(QUEUE_TEMPLATE, &[])).await.unwrap();
        assert_eq!(handle.base_revision, 0);
        assert_eq!(handle.changes.len(), 1);
        assert_eq!(handle.changes[0].action, ChangeAction::Add);

        // Preparing does not touch the stack
        assert!(engine.stacks().await.is_empty());

        let stack = engine.execute(&handle).await.unwrap();
        assert_eq!(stack.revision, 1);
        assert_eq!(stack.resources.len(), 1);

        // Re-preparing the same template yields an empty change-set
        let again = engine.prepare(request(QUEUE_TEMPLATE, &[])).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(again.base_revision, 1);
    }

    #[tokio::test]
    async fn test_handle_is_single_use() {
        let engine = LocalChangeSetEngine::new();
        let handle = engine.prepare(request(QUEUE_TEMPLATE, &[])).await.unwrap();

        engine.execute(&handle).await.unwrap();
        let err = engine.execute(&handle).await.unwrap_err();
        assert!(matches!(err, ApplyError::UnknownChangeSet { .. }));
    }

    #[tokio::test]
    async fn test_drift_rejects_apply() {
        let engine = LocalChangeSetEngine::new();
        let handle = engine.prepare(request(QUEUE_TEMPLATE, &[])).await.unwrap();

        engine.record_external_change("SQSStack2", "Topic").await;

        let err = engine.execute(&handle).await.unwrap_err();
        assert_eq!(
            err,
            ApplyError::Drift {
                stack: "SQSStack2".to_string(),
                expected: 0,
                actual: 1,
            }
        );

        // The drifted handle is invalidated; the stack is untouched
        assert!(engine.execute(&handle).await.is_err());
        let stacks = engine.stacks().await;
        assert_eq!(stacks[0].revision, 1);
        assert!(!stacks[0].resources.contains_key("Queue"));
    }

    #[tokio::test]
    async fn test_discard_releases_handle() {
        let engine = LocalChangeSetEngine::new();
        let handle = engine.prepare(request(QUEUE_TEMPLATE, &[])).await.unwrap();
        assert_eq!(engine.pending_change_sets().await, 1);

        assert!(engine.discard(&handle).await);
        assert!(!engine.discard(&handle).await);
        assert_eq!(engine.pending_change_sets().await, 0);

        let err = engine.execute(&handle).await.unwrap_err();
        assert!(matches!(err, ApplyError::UnknownChangeSet { .. }));
        assert!(engine.stacks().await.is_empty());
    }

    #[tokio::test]
    async fn test_named_iam_requires_capability() {
        let template = r#"{
            "Resources": {
                "Role": { "Type": "AWS::IAM::Role", "Properties": { "RoleName": "deployer" } }
            }
        }"#;
        let engine = LocalChangeSetEngine::new();

        let err = engine
            .prepare(request(template, &[Capability::AnonymousIam]))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::MissingCapability { .. }));

        assert!(
            engine
                .prepare(request(template, &[Capability::NamedIam]))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_malformed_template() {
        let engine = LocalChangeSetEngine::new();
        let err = engine.prepare(request("not json", &[])).await.unwrap_err();
        assert!(matches!(err, PreviewError::MalformedTemplate { .. }));
    }
}
