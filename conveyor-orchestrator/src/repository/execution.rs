//! Execution Repository
//!
//! Execution records, updated in place by the engine while a run progresses.

use conveyor_core::domain::execution::{Execution, ExecutionStatus};
use uuid::Uuid;

use crate::db::{Database, DbError};

/// Insert a new execution record
pub async fn create(db: &Database, execution: Execution) -> Result<Execution, DbError> {
    let mut executions = db.tables.executions.write().await;
    if executions.contains_key(&execution.id) {
        return Err(DbError::Conflict(format!(
            "execution {} already exists",
            execution.id
        )));
    }
    executions.insert(execution.id, execution.clone());
    Ok(execution)
}

/// Find an execution by ID
pub async fn find_by_id(db: &Database, id: Uuid) -> Option<Execution> {
    let executions = db.tables.executions.read().await;
    executions.get(&id).cloned()
}

/// List all executions, newest first
pub async fn list_all(db: &Database) -> Vec<Execution> {
    let executions = db.tables.executions.read().await;
    let mut all: Vec<Execution> = executions.values().cloned().collect();
    all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    all
}

/// List executions of a pipeline, highest sequence first
pub async fn find_by_pipeline(db: &Database, pipeline_id: Uuid) -> Vec<Execution> {
    let executions = db.tables.executions.read().await;
    let mut found: Vec<Execution> = executions
        .values()
        .filter(|e| e.pipeline_id == pipeline_id)
        .cloned()
        .collect();
    found.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    found
}

/// Executions of a pipeline that are still in progress
pub async fn find_active_by_pipeline(db: &Database, pipeline_id: Uuid) -> Vec<Execution> {
    let executions = db.tables.executions.read().await;
    executions
        .values()
        .filter(|e| e.pipeline_id == pipeline_id && e.status == ExecutionStatus::InProgress)
        .cloned()
        .collect()
}

/// Apply a change to an execution record under the table lock
///
/// Returns the updated record, or `None` if the execution does not exist.
pub async fn update<F>(db: &Database, id: Uuid, f: F) -> Option<Execution>
where
    F: FnOnce(&mut Execution),
{
    let mut executions = db.tables.executions.write().await;
    executions.get_mut(&id).map(|execution| {
        f(execution);
        execution.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::execution::TriggerInfo;

    fn execution(pipeline_id: Uuid, sequence: u64) -> Execution {
        Execution::new(
            pipeline_id,
            "Demo".to_string(),
            sequence,
            1,
            TriggerInfo {
                branch: "main".to_string(),
                commit: format!("c{}", sequence),
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let db = Database::new();
        let created = create(&db, execution(Uuid::new_v4(), 1)).await.unwrap();

        let updated = update(&db, created.id, |e| {
            e.current_stage = Some("Build".to_string());
        })
        .await
        .unwrap();
        assert_eq!(updated.current_stage.as_deref(), Some("Build"));

        assert!(create(&db, created).await.is_err());
        assert!(update(&db, Uuid::new_v4(), |_| {}).await.is_none());
    }

    #[tokio::test]
    async fn test_find_by_pipeline_ordering_and_active() {
        let db = Database::new();
        let pipeline_id = Uuid::new_v4();
        let first = create(&db, execution(pipeline_id, 1)).await.unwrap();
        create(&db, execution(pipeline_id, 2)).await.unwrap();
        create(&db, execution(Uuid::new_v4(), 1)).await.unwrap();

        let found = find_by_pipeline(&db, pipeline_id).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].sequence, 2);

        update(&db, first.id, |e| e.finish(ExecutionStatus::Succeeded, None)).await;
        let active = find_active_by_pipeline(&db, pipeline_id).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].sequence, 2);
    }
}
