//! Execution driver
//!
//! Walks an execution through its stages in declaration order. Stop requests
//! (cancellation, supersession) are honoured between stages. The
//! self-mutation stage may rebind the execution to a newer definition
//! version, after which it continues with the stages following the mutation
//! stage in that version.

use conveyor_core::{ValidatedPipeline, validate};
use conveyor_core::domain::artifact::Artifact;
use conveyor_core::domain::execution::{
    Execution, ExecutionStatus, FailureCause, FailureKind, StageRecord, StageStatus, TriggerInfo,
};
use conveyor_core::domain::pipeline::{ExecutionMode, VersionOrigin};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::engine::log_buffer::{ActionLog, InMemoryLogBuffer, LogBufferService};
use crate::engine::stage::{self, StageFailure};
use crate::engine::{Engine, StopReason, stopped};
use crate::repository::pipeline::StoreOutcome;
use crate::repository::{execution_repository, log_repository, pipeline_repository};

/// Per-execution state shared with action tasks
pub struct RunContext {
    pub execution_id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub trigger: TriggerInfo,
    /// Trigger sequence of the source revision being run
    pub source_sequence: u64,
    /// Source snapshot the execution was started from
    pub source: Arc<Artifact>,
    pub stop: watch::Receiver<Option<StopReason>>,
    pub log: ActionLog,
    buffer: InMemoryLogBuffer,
    /// Stored artifacts by declared name
    bound: RwLock<HashMap<String, Arc<Artifact>>>,
}

impl RunContext {
    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop.borrow()
    }

    pub async fn bind(&self, artifact: Arc<Artifact>) {
        self.bound
            .write()
            .await
            .insert(artifact.name.clone(), artifact);
    }

    pub async fn bound(&self, name: &str) -> Option<Arc<Artifact>> {
        self.bound.read().await.get(name).cloned()
    }

    /// Moves buffered log entries to the log repository
    pub async fn flush_logs(&self, db: &Database) {
        log_repository::add_entries(db, self.execution_id, self.buffer.drain()).await;
    }
}

enum Ending {
    Stopped(StopReason),
    Failed(FailureCause),
}

impl From<StageFailure> for FailureCause {
    fn from(failure: StageFailure) -> Self {
        FailureCause {
            stage: failure.stage,
            action: Some(failure.action),
            kind: failure.error.kind(),
            message: failure.error.to_string(),
        }
    }
}

/// Runs an execution to a terminal status
pub async fn drive(
    engine: Engine,
    execution: Execution,
    validated: ValidatedPipeline,
    source: Arc<Artifact>,
    stop: watch::Receiver<Option<StopReason>>,
) -> ExecutionStatus {
    let buffer = InMemoryLogBuffer::new();
    let run = Arc::new(RunContext {
        execution_id: execution.id,
        pipeline_id: execution.pipeline_id,
        pipeline_name: execution.pipeline_name.clone(),
        trigger: execution.trigger.clone(),
        source_sequence: execution.source_sequence,
        source,
        stop: stop.clone(),
        log: ActionLog::new(Arc::new(buffer.clone()), None),
        buffer,
        bound: RwLock::new(HashMap::new()),
    });

    for warning in validated.warnings() {
        run.log.warning(warning.clone());
    }

    let mut stop = stop;
    let mut validated = validated;
    let mut version = execution.version;
    let mut index = 0usize;

    let ending = loop {
        let Some(stage) = validated.definition().stages.get(index).cloned() else {
            break None;
        };

        if let Some(reason) = run.stop_reason() {
            break Some(Ending::Stopped(reason));
        }

        let _slot = if validated.definition().mode == ExecutionMode::Sequential {
            let slot = engine.stage_slot(run.pipeline_id, &stage.name).await;
            tokio::select! {
                guard = slot.lock_owned() => Some(guard),
                _ = stopped(&mut stop) => {
                    break Some(Ending::Stopped(run.stop_reason().unwrap_or(StopReason::Cancelled)));
                }
            }
        } else {
            None
        };

        execution_repository::update(engine.db(), run.execution_id, |e| {
            e.current_stage = Some(stage.name.clone());
            e.stages.push(StageRecord::started(&stage.name));
        })
        .await;
        run.log.info(format!("Stage '{}' started", stage.name));
        info!(execution_id = %run.execution_id, stage = %stage.name, "Stage started");

        match stage::run_stage(&engine, &run, &validated, &stage.name).await {
            Ok(outcome) => {
                set_stage_status(&engine, &run, &stage.name, StageStatus::Succeeded).await;
                run.log.info(format!("Stage '{}' succeeded", stage.name));

                let Some((action, mutated)) = outcome.mutation else {
                    index += 1;
                    continue;
                };

                match apply_mutation(&engine, &run, &stage.name, &action, mutated, version).await {
                    Ok(Some((rebound, rebound_version, next))) => {
                        validated = rebound;
                        version = rebound_version;
                        index = next;
                    }
                    Ok(None) => index += 1,
                    Err(cause) => break Some(Ending::Failed(cause)),
                }
            }
            Err(failure) if failure.error.is_cancelled() => {
                set_stage_status(&engine, &run, &stage.name, StageStatus::Cancelled).await;
                break Some(Ending::Stopped(
                    run.stop_reason().unwrap_or(StopReason::Cancelled),
                ));
            }
            Err(failure) => {
                set_stage_status(&engine, &run, &stage.name, StageStatus::Failed).await;
                break Some(Ending::Failed(failure.into()));
            }
        }
    };

    let (status, failure) = match ending {
        None => (ExecutionStatus::Succeeded, None),
        Some(Ending::Stopped(reason)) => (reason.status(), None),
        Some(Ending::Failed(cause)) => (ExecutionStatus::Failed, Some(cause)),
    };

    match &failure {
        Some(cause) => {
            run.log.error(format!("Execution failed: {}", cause));
            warn!(execution_id = %run.execution_id, "Execution failed: {}", cause);
        }
        None => {
            run.log.info(format!("Execution finished: {}", status));
            info!(execution_id = %run.execution_id, %status, "Execution finished");
        }
    }

    run.flush_logs(engine.db()).await;

    let record = execution_repository::update(engine.db(), run.execution_id, |e| {
        e.finish(status, failure);
    })
    .await;

    if status == ExecutionStatus::Superseded
        && let Some(record) = record
        && let Err(e) = engine.restart(&record).await
    {
        error!(execution_id = %record.id, "Failed to restart superseded execution: {}", e);
    }

    status
}

async fn set_stage_status(engine: &Engine, run: &RunContext, stage: &str, status: StageStatus) {
    execution_repository::update(engine.db(), run.execution_id, |e| {
        if let Some(record) = e.stage_mut(stage) {
            record.status = status;
            record.completed_at = Some(chrono::Utc::now());
        }
    })
    .await;
}

/// Stores the re-derived definition and rebinds the execution when its
/// version moved
///
/// A definition derived from an older source revision than the one behind
/// the latest version is not stored; the execution then continues on the
/// latest version instead.
///
/// Returns the definition to continue with and the index of the next stage,
/// or `None` when the execution stays on its current version.
async fn apply_mutation(
    engine: &Engine,
    run: &RunContext,
    stage: &str,
    action: &str,
    mutated: ValidatedPipeline,
    bound_version: u32,
) -> Result<Option<(ValidatedPipeline, u32, usize)>, FailureCause> {
    let cause = |kind: FailureKind, message: String| FailureCause {
        stage: stage.to_string(),
        action: Some(action.to_string()),
        kind,
        message,
    };

    let outcome = pipeline_repository::store_version(
        engine.db(),
        run.pipeline_id,
        &mutated,
        VersionOrigin::SelfMutation {
            execution_id: run.execution_id,
        },
        run.source_sequence,
    )
    .await
    .map_err(|e| cause(FailureKind::Internal, e.to_string()))?;

    let version = outcome.version();
    let rebound = match outcome {
        StoreOutcome::Stored(version) => {
            info!(
                pipeline = %run.pipeline_name,
                version,
                execution_id = %run.execution_id,
                "Stored new pipeline definition version"
            );
            run.log
                .info(format!("Pipeline definition updated to version {}", version));

            if mutated.definition().restart_on_update {
                engine
                    .supersede_older(run.pipeline_id, version, run.source_sequence, run.execution_id)
                    .await;
            }
            mutated
        }
        StoreOutcome::Unchanged(version) => {
            run.log.info(format!(
                "Pipeline definition unchanged (version {})",
                version
            ));
            mutated
        }
        StoreOutcome::Stale(version) => {
            warn!(
                pipeline = %run.pipeline_name,
                version,
                execution_id = %run.execution_id,
                "Derived definition is older than the latest version, keeping the latest"
            );
            run.log.warning(format!(
                "Definition derived from this revision is older than the latest; continuing on version {}",
                version
            ));
            if version == bound_version {
                return Ok(None);
            }
            latest_definition(engine, run.pipeline_id, version)
                .await
                .map_err(|message| cause(FailureKind::Internal, message))?
        }
    };

    if version == bound_version {
        return Ok(None);
    }

    let next = rebound
        .definition()
        .stage_index(stage)
        .map(|i| i + 1)
        .ok_or_else(|| {
            cause(
                FailureKind::Validation,
                format!(
                    "updated definition version {} no longer contains stage '{}'",
                    version, stage
                ),
            )
        })?;

    execution_repository::update(engine.db(), run.execution_id, |e| e.version = version).await;
    run.log.info(format!(
        "Execution rebound from version {} to version {}",
        bound_version, version
    ));

    Ok(Some((rebound, version, next)))
}

async fn latest_definition(
    engine: &Engine,
    pipeline_id: Uuid,
    version: u32,
) -> Result<ValidatedPipeline, String> {
    let stored = pipeline_repository::find_version(engine.db(), pipeline_id, version)
        .await
        .ok_or_else(|| format!("pipeline version {} not found", version))?;
    validate(stored.definition).map_err(|e| e.to_string())
}
