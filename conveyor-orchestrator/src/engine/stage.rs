//! Stage executor
//!
//! Runs a stage's run-order partitions in ascending order. Actions of one
//! partition run concurrently, bounded by `max_parallel_actions`. When an
//! action fails, actions of the partition still waiting for a slot are
//! skipped, running ones finish, and the whole partition's outputs are
//! discarded.
//! Outputs are only stored once every action of the partition succeeded.

use conveyor_core::domain::artifact::{ActionAddress, Artifact};
use conveyor_core::domain::execution::{ActionRecord, ActionStatus};
use conveyor_core::domain::pipeline::ActionDefinition;
use conveyor_core::{ValidatedPipeline, ValidationError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::Engine;
use crate::engine::action::{ActionError, ActionInput, ActionOutput, ActionTask};
use crate::engine::run::RunContext;
use crate::repository::{artifact_repository, execution_repository};

/// Result of a successful stage
#[derive(Debug, Default)]
pub struct StageOutcome {
    /// Self-mutation action name and the definition it re-derived
    pub mutation: Option<(String, ValidatedPipeline)>,
}

/// First failure of a stage
#[derive(Debug, Error)]
#[error("stage '{stage}' failed at action '{action}': {error}")]
pub struct StageFailure {
    pub stage: String,
    pub action: String,
    pub error: ActionError,
}

enum TaskResult {
    /// Was still waiting for a slot when a sibling failed
    Skipped,
    Finished {
        result: Result<ActionOutput, ActionError>,
        /// Position among the partition's failures, in time
        failure_order: Option<usize>,
    },
}

/// Runs every partition of a stage
pub async fn run_stage(
    engine: &Engine,
    run: &Arc<RunContext>,
    validated: &ValidatedPipeline,
    stage: &str,
) -> Result<StageOutcome, StageFailure> {
    let semaphore = Arc::new(Semaphore::new(engine.config().max_parallel_actions));
    let mut outcome = StageOutcome::default();

    for partition in validated.partitions(stage) {
        debug!(
            stage,
            run_order = partition.run_order,
            actions = partition.actions.len(),
            "Running partition"
        );

        let failed = Arc::new(AtomicBool::new(false));
        let failures = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(partition.actions.len());

        for action in &partition.actions {
            let action: ActionDefinition = (*action).clone();
            let inputs = resolve_inputs(run, validated, stage, &action).await;

            let task_engine = engine.clone();
            let task_run = Arc::clone(run);
            let semaphore = Arc::clone(&semaphore);
            let failed = Arc::clone(&failed);
            let failures = Arc::clone(&failures);
            let stage_name = stage.to_string();
            let definition = action.clone();

            // Slots are handed out in declaration order; an action that gets
            // one here has started, whatever order its task is polled in
            let ready = Arc::clone(&semaphore).try_acquire_owned().ok();

            let handle = tokio::spawn(async move {
                let _permit = match ready {
                    Some(permit) => permit,
                    None => {
                        let Ok(permit) = semaphore.acquire_owned().await else {
                            return TaskResult::Skipped;
                        };
                        if failed.load(Ordering::SeqCst) {
                            return TaskResult::Skipped;
                        }
                        permit
                    }
                };

                record_start(&task_engine, &task_run, &stage_name, &definition).await;

                let result = match inputs {
                    Ok(inputs) => {
                        let log = task_run
                            .log
                            .scoped(format!("{}/{}", stage_name, definition.name));
                        ActionTask {
                            engine: task_engine,
                            run: task_run,
                            stage: stage_name,
                            action: definition,
                            inputs,
                            log,
                        }
                        .execute()
                        .await
                    }
                    Err(e) => Err(e),
                };

                let failure_order = if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                    Some(failures.fetch_add(1, Ordering::SeqCst))
                } else {
                    None
                };

                TaskResult::Finished {
                    result,
                    failure_order,
                }
            });

            handles.push((action, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (action, handle) in handles {
            let result = handle.await.unwrap_or_else(|e| {
                error!(stage, action = %action.name, "Action task panicked: {}", e);
                failed.store(true, Ordering::SeqCst);
                TaskResult::Finished {
                    result: Err(ActionError::Internal(format!("action task panicked: {}", e))),
                    failure_order: Some(failures.fetch_add(1, Ordering::SeqCst)),
                }
            });
            results.push((action, result));
        }

        let partition_failed = failed.load(Ordering::SeqCst);
        let mut first_failure: Option<(usize, String, ActionError)> = None;

        for (action, result) in results {
            match result {
                TaskResult::Skipped => {
                    run.log.scoped(format!("{}/{}", stage, action.name)).info(
                        "Not started: another action in the same run order failed",
                    );
                    record_skipped(engine, run, stage, &action).await;
                }
                TaskResult::Finished {
                    result: Err(error),
                    failure_order,
                } => {
                    run.log
                        .scoped(format!("{}/{}", stage, action.name))
                        .error(error.to_string());
                    record_finish(engine, run, stage, &action.name, ActionStatus::Failed, Vec::new(), Some(error.to_string())).await;

                    let order = failure_order.unwrap_or(usize::MAX);
                    if first_failure.as_ref().is_none_or(|(o, _, _)| order < *o) {
                        first_failure = Some((order, action.name.clone(), error));
                    }
                }
                TaskResult::Finished { result: Ok(_), .. } if partition_failed => {
                    record_finish(
                        engine,
                        run,
                        stage,
                        &action.name,
                        ActionStatus::Discarded,
                        Vec::new(),
                        Some("outputs discarded: another action in the same run order failed".to_string()),
                    )
                    .await;
                }
                TaskResult::Finished { result: Ok(output), .. } => {
                    let ids = match bind_outputs(engine, run, stage, &action, output.files).await {
                        Ok(ids) => ids,
                        Err(error) => {
                            record_finish(engine, run, stage, &action.name, ActionStatus::Failed, Vec::new(), Some(error.to_string())).await;
                            run.flush_logs(engine.db()).await;
                            return Err(StageFailure {
                                stage: stage.to_string(),
                                action: action.name.clone(),
                                error,
                            });
                        }
                    };
                    record_finish(engine, run, stage, &action.name, ActionStatus::Succeeded, ids, None).await;

                    if let Some(validated) = output.mutation {
                        outcome.mutation = Some((action.name.clone(), validated));
                    }
                }
            }
        }

        run.flush_logs(engine.db()).await;

        if let Some((_, action, error)) = first_failure {
            info!(stage, action = %action, "Partition failed: {}", error);
            return Err(StageFailure {
                stage: stage.to_string(),
                action,
                error,
            });
        }
    }

    Ok(outcome)
}

async fn resolve_inputs(
    run: &RunContext,
    validated: &ValidatedPipeline,
    stage: &str,
    action: &ActionDefinition,
) -> Result<Vec<ActionInput>, ActionError> {
    let mut inputs = Vec::new();
    for resolved in validated.inputs_of(stage, &action.name) {
        let artifact = run.bound(&resolved.reference.artifact).await.ok_or_else(|| {
            ValidationError::UnresolvedInput {
                stage: stage.to_string(),
                action: action.name.clone(),
                artifact: resolved.reference.artifact.clone(),
            }
        })?;
        inputs.push(ActionInput {
            reference: resolved.reference.clone(),
            artifact,
        });
    }
    Ok(inputs)
}

/// Stores one artifact per declared output and binds it by name
async fn bind_outputs(
    engine: &Engine,
    run: &RunContext,
    stage: &str,
    action: &ActionDefinition,
    files: Option<crate::engine::FileMap>,
) -> Result<Vec<Uuid>, ActionError> {
    let Some(files) = files else {
        return Ok(Vec::new());
    };

    let mut ids = Vec::with_capacity(action.outputs.len());
    for output in &action.outputs {
        let artifact = Artifact::new(output, files.clone())
            .produced_by(ActionAddress::new(stage, &action.name));
        let stored = artifact_repository::put(engine.db(), run.execution_id, artifact)
            .await
            .map_err(|e| ActionError::Internal(e.to_string()))?;

        debug!(
            artifact = %stored.name,
            files = stored.files.len(),
            bytes = stored.total_size(),
            "Stored artifact"
        );
        ids.push(stored.id);
        run.bind(stored).await;
    }
    Ok(ids)
}

async fn record_start(engine: &Engine, run: &RunContext, stage: &str, action: &ActionDefinition) {
    let record = ActionRecord::started(&action.name, action.kind(), action.effective_run_order());
    execution_repository::update(engine.db(), run.execution_id, |e| {
        if let Some(stage) = e.stage_mut(stage) {
            stage.actions.push(record);
        }
    })
    .await;
}

async fn record_skipped(engine: &Engine, run: &RunContext, stage: &str, action: &ActionDefinition) {
    let mut record = ActionRecord::started(&action.name, action.kind(), action.effective_run_order());
    record.status = ActionStatus::Skipped;
    record.message = Some("not started: another action in the same run order failed".to_string());
    execution_repository::update(engine.db(), run.execution_id, |e| {
        if let Some(stage) = e.stage_mut(stage) {
            stage.actions.push(record);
        }
    })
    .await;
}

async fn record_finish(
    engine: &Engine,
    run: &RunContext,
    stage: &str,
    action: &str,
    status: ActionStatus,
    outputs: Vec<Uuid>,
    message: Option<String>,
) {
    execution_repository::update(engine.db(), run.execution_id, |e| {
        if let Some(record) = e.stage_mut(stage).and_then(|s| s.action_mut(action)) {
            record.status = status;
            record.outputs = outputs;
            record.message = message;
            record.completed_at = Some(chrono::Utc::now());
        }
    })
    .await;
}
