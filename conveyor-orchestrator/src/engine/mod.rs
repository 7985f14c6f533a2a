//! Pipeline engine
//!
//! Drives executions through their stages: run-order partitions inside a
//! stage, approval gates, the self-mutation step and change-set deploys.
//! Every execution runs in its own task; the engine keeps a stop channel per
//! running execution so it can be cancelled or superseded at the next stage
//! boundary.

pub mod action;
pub mod approval;
pub mod collaborators;
pub mod local;
pub mod log_buffer;
pub mod run;
pub mod stage;


use conveyor_core::domain::approval::{ApprovalGate, Decision, GateError};
use conveyor_core::domain::artifact::Artifact;
use conveyor_core::domain::changeset::{ChangeSetHandle, StackState};
use conveyor_core::domain::execution::{Execution, ExecutionStatus, TriggerInfo};
use conveyor_core::domain::pipeline::{ActionParams, PipelineDefinition};
use conveyor_core::{ValidatedPipeline, ValidationError, validate};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Database, DbError};
use crate::repository::{
    approval_repository, artifact_repository, execution_repository, pipeline_repository,
};

pub use approval::ApprovalRegistry;
pub use collaborators::{Collaborators, FileMap};

/// Engine-level failure of a request
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("trigger on branch '{actual}' ignored: pipeline tracks '{expected}'")]
    BranchMismatch { expected: String, actual: String },

    #[error("execution {0} is not in progress")]
    NotActive(Uuid),

    #[error("execution {execution_id} has no approval gate for action '{action}'")]
    GateNotFound { execution_id: Uuid, action: String },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    InvalidDefinition(#[from] ValidationError),

    #[error(transparent)]
    Source(#[from] collaborators::SourceError),

    #[error("source path '{0}' leaves the workspace")]
    UnsafePath(String),

    #[error(transparent)]
    Storage(#[from] DbError),
}

/// Why a running execution was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// A newer definition version was stored by another execution
    Superseded,
}

impl StopReason {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            StopReason::Cancelled => ExecutionStatus::Cancelled,
            StopReason::Superseded => ExecutionStatus::Superseded,
        }
    }
}

/// Resolves once a stop has been requested or the engine dropped the run
pub(crate) async fn stopped(stop: &mut watch::Receiver<Option<StopReason>>) {
    let _ = stop.wait_for(|reason| reason.is_some()).await;
}

struct RunHandle {
    stop: watch::Sender<Option<StopReason>>,
    done: watch::Receiver<Option<ExecutionStatus>>,
}

type ChangeSetKey = (Uuid, String, String);

struct EngineInner {
    db: Database,
    config: Config,
    collaborators: Collaborators,
    approvals: ApprovalRegistry,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
    stage_slots: Mutex<HashMap<(Uuid, String), Arc<Mutex<()>>>>,
    change_sets: Mutex<HashMap<ChangeSetKey, ChangeSetHandle>>,
}

/// Handle to the engine, cheap to clone
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(db: Database, config: Config, collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                db,
                config,
                collaborators,
                approvals: ApprovalRegistry::new(),
                runs: Mutex::new(HashMap::new()),
                stage_slots: Mutex::new(HashMap::new()),
                change_sets: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.inner.collaborators
    }

    pub(crate) fn approvals(&self) -> &ApprovalRegistry {
        &self.inner.approvals
    }

    /// Environment exported to build commands
    pub fn command_env(&self) -> BTreeMap<String, String> {
        let config = self.config();
        BTreeMap::from([
            ("CONVEYOR_ACCOUNT".to_string(), config.account.clone()),
            ("CONVEYOR_REGION".to_string(), config.region.clone()),
            ("CDK_DEFAULT_ACCOUNT".to_string(), config.account.clone()),
            ("CDK_DEFAULT_REGION".to_string(), config.region.clone()),
        ])
    }

    /// Branch the pipeline's Source action tracks
    fn tracked_branch(&self, definition: &PipelineDefinition) -> String {
        definition
            .stages
            .first()
            .and_then(|stage| {
                stage.actions.iter().find_map(|a| match &a.params {
                    ActionParams::Source { branch, .. } => branch.clone(),
                    _ => None,
                })
            })
            .unwrap_or_else(|| self.config().source_branch.clone())
    }

    /// Starts an execution for a pushed revision
    ///
    /// Inline `files` take the place of the source provider's snapshot.
    pub async fn trigger(
        &self,
        pipeline_id: Uuid,
        trigger: TriggerInfo,
        files: Option<FileMap>,
    ) -> Result<Execution, EngineError> {
        let pipeline = pipeline_repository::find_by_id(self.db(), pipeline_id)
            .await
            .ok_or(EngineError::PipelineNotFound(pipeline_id))?;

        let expected = self.tracked_branch(&pipeline.definition);
        if trigger.branch != expected {
            info!(
                pipeline = %pipeline.name,
                branch = %trigger.branch,
                "Ignoring trigger for untracked branch"
            );
            return Err(EngineError::BranchMismatch {
                expected,
                actual: trigger.branch,
            });
        }

        let validated = validate(pipeline.definition.clone())?;

        let snapshot = match files {
            Some(files) => Artifact::new("source", files),
            None => {
                self.collaborators()
                    .source
                    .notify(&trigger.branch, &trigger.commit)
                    .await?
            }
        };
        if let Some(path) = snapshot.escaping_path() {
            warn!(pipeline = %pipeline.name, path, "Rejecting source with unsafe path");
            return Err(EngineError::UnsafePath(path.to_string()));
        }

        let sequence = pipeline_repository::next_sequence(self.db(), pipeline_id)
            .await
            .ok_or(EngineError::PipelineNotFound(pipeline_id))?;

        let mut execution = Execution::new(
            pipeline_id,
            pipeline.name.clone(),
            sequence,
            pipeline.version,
            trigger,
        );
        let source = artifact_repository::put(self.db(), execution.id, snapshot).await?;
        execution.source_artifact = Some(source.id);

        let execution = execution_repository::create(self.db(), execution).await?;

        info!(
            pipeline = %pipeline.name,
            sequence,
            version = pipeline.version,
            execution_id = %execution.id,
            commit = %execution.trigger.commit,
            "Execution started"
        );

        self.start(execution.clone(), validated, source).await;
        Ok(execution)
    }

    /// Starts a replacement for a superseded execution from the same source revision
    ///
    /// The replacement takes over the source artifact and keeps the source
    /// sequence of the execution it replaces. Boxed because a superseded run
    /// calls this from inside its own driver.
    pub(crate) fn restart<'a>(
        &'a self,
        superseded: &'a Execution,
    ) -> Pin<Box<dyn Future<Output = Result<Execution, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let pipeline = pipeline_repository::find_by_id(self.db(), superseded.pipeline_id)
                .await
                .ok_or(EngineError::PipelineNotFound(superseded.pipeline_id))?;
            let validated = validate(pipeline.definition.clone())?;

            let source_id = superseded.source_artifact.ok_or_else(|| {
                DbError::NotFound(format!("source of execution {}", superseded.id))
            })?;
            let source = artifact_repository::get(self.db(), source_id)
                .await
                .ok_or_else(|| DbError::NotFound(format!("artifact {}", source_id)))?;

            let sequence = pipeline_repository::next_sequence(self.db(), pipeline.id)
                .await
                .ok_or(EngineError::PipelineNotFound(pipeline.id))?;

            let mut execution = Execution::new(
                pipeline.id,
                pipeline.name.clone(),
                sequence,
                pipeline.version,
                superseded.trigger.clone(),
            );
            execution.source_sequence = superseded.source_sequence;
            execution.source_artifact = Some(source.id);
            execution.restart_of = Some(superseded.id);

            artifact_repository::transfer(self.db(), source.id, execution.id).await?;
            let execution = execution_repository::create(self.db(), execution).await?;
            execution_repository::update(self.db(), superseded.id, |e| {
                e.superseded_by = Some(execution.id);
            })
            .await;

            info!(
                pipeline = %pipeline.name,
                superseded = %superseded.id,
                replacement = %execution.id,
                version = pipeline.version,
                "Restarted superseded execution"
            );

            self.start(execution.clone(), validated, source).await;
            Ok(execution)
        })
    }

    async fn start(&self, execution: Execution, validated: ValidatedPipeline, source: Arc<Artifact>) {
        let (stop_tx, stop_rx) = watch::channel(None);
        let (done_tx, done_rx) = watch::channel(None);

        self.inner.runs.lock().await.insert(
            execution.id,
            RunHandle {
                stop: stop_tx,
                done: done_rx,
            },
        );

        let engine = self.clone();
        let execution_id = execution.id;

        tokio::spawn(async move {
            let status = run::drive(engine.clone(), execution, validated, source, stop_rx).await;

            engine.drop_change_sets(execution_id).await;
            let released = artifact_repository::release(engine.db(), execution_id).await;
            debug!(%execution_id, released, "Released execution artifacts");

            engine.inner.runs.lock().await.remove(&execution_id);
            let _ = done_tx.send(Some(status));
        });
    }

    /// Requests cancellation; honoured at the next stage boundary or gate
    pub async fn cancel(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = execution_repository::find_by_id(self.db(), execution_id)
            .await
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        if execution.status.is_terminal() {
            return Err(EngineError::NotActive(execution_id));
        }

        let runs = self.inner.runs.lock().await;
        let handle = runs
            .get(&execution_id)
            .ok_or(EngineError::NotActive(execution_id))?;

        handle.stop.send_if_modified(|reason| {
            if reason.is_none() {
                *reason = Some(StopReason::Cancelled);
                true
            } else {
                false
            }
        });

        info!(%execution_id, "Cancellation requested");
        Ok(execution)
    }

    /// Marks every other active execution bound to an older version for supersession
    ///
    /// Only executions running an older source revision than the one the new
    /// version was derived from are affected.
    pub(crate) async fn supersede_older(
        &self,
        pipeline_id: Uuid,
        version: u32,
        source_sequence: u64,
        except: Uuid,
    ) {
        let active = execution_repository::find_active_by_pipeline(self.db(), pipeline_id).await;
        let runs = self.inner.runs.lock().await;

        for execution in active.iter().filter(|e| {
            e.id != except && e.version < version && e.source_sequence < source_sequence
        }) {
            if let Some(handle) = runs.get(&execution.id) {
                let marked = handle.stop.send_if_modified(|reason| {
                    if reason.is_none() {
                        *reason = Some(StopReason::Superseded);
                        true
                    } else {
                        false
                    }
                });
                if marked {
                    info!(
                        execution_id = %execution.id,
                        bound_version = execution.version,
                        version,
                        "Execution will be superseded at its next stage boundary"
                    );
                }
            }
        }
    }

    /// Records an approval decision and wakes the waiting gate
    pub async fn decide(
        &self,
        execution_id: Uuid,
        action: &str,
        decision: Decision,
        actor: &str,
        comment: Option<String>,
    ) -> Result<ApprovalGate, EngineError> {
        execution_repository::find_by_id(self.db(), execution_id)
            .await
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        let gate = approval_repository::resolve(self.db(), execution_id, action, |gate| {
            gate.decide(decision, actor, comment)
        })
        .await
        .ok_or_else(|| EngineError::GateNotFound {
            execution_id,
            action: action.to_string(),
        })??;

        info!(
            %execution_id,
            action,
            actor,
            state = ?gate.state,
            "Approval decision recorded"
        );

        self.approvals().notify(execution_id, action).await;
        Ok(gate)
    }

    /// Waits until an execution reaches a terminal status
    pub async fn wait_for_completion(&self, execution_id: Uuid) -> Option<Execution> {
        let done = {
            let runs = self.inner.runs.lock().await;
            runs.get(&execution_id).map(|h| h.done.clone())
        };

        if let Some(mut done) = done
            && done.wait_for(|status| status.is_some()).await.is_err()
        {
            warn!(%execution_id, "Execution task ended without reporting a status");
        }

        execution_repository::find_by_id(self.db(), execution_id).await
    }

    /// Live state of deployed stacks
    pub async fn stacks(&self) -> Vec<StackState> {
        self.collaborators().change_sets.stacks().await
    }

    /// Serializes executions of a SEQUENTIAL pipeline on one stage
    pub(crate) async fn stage_slot(&self, pipeline_id: Uuid, stage: &str) -> Arc<Mutex<()>> {
        let mut slots = self.inner.stage_slots.lock().await;
        Arc::clone(
            slots
                .entry((pipeline_id, stage.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub(crate) async fn store_change_set(&self, execution_id: Uuid, handle: ChangeSetHandle) {
        let key = (
            execution_id,
            handle.stack_name.clone(),
            handle.change_set_name.clone(),
        );
        self.inner.change_sets.lock().await.insert(key, handle);
    }

    pub(crate) async fn take_change_set(
        &self,
        execution_id: Uuid,
        stack_name: &str,
        change_set_name: &str,
    ) -> Option<ChangeSetHandle> {
        let key = (
            execution_id,
            stack_name.to_string(),
            change_set_name.to_string(),
        );
        self.inner.change_sets.lock().await.remove(&key)
    }

    /// Discards change-sets an execution prepared but never executed
    async fn drop_change_sets(&self, execution_id: Uuid) {
        let unused: Vec<ChangeSetHandle> = {
            let mut change_sets = self.inner.change_sets.lock().await;
            let keys: Vec<ChangeSetKey> = change_sets
                .keys()
                .filter(|(id, _, _)| *id == execution_id)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| change_sets.remove(key))
                .collect()
        };

        for handle in unused {
            self.collaborators().change_sets.discard(&handle).await;
        }
    }
}
