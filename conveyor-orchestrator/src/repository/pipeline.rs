//! Pipeline Repository
//!
//! Versioned pipeline definitions. Versions are immutable; the pipeline
//! record always mirrors the latest one.

use conveyor_core::ValidatedPipeline;
use conveyor_core::domain::pipeline::{Pipeline, PipelineVersion, VersionOrigin};
use uuid::Uuid;

use crate::db::{Database, DbError, PipelineRow};

/// Result of storing a re-derived definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Content matched the latest version; nothing was written
    Unchanged(u32),
    /// A new version was written
    Stored(u32),
    /// The latest version came from a newer source revision; nothing was written
    Stale(u32),
}

impl StoreOutcome {
    pub fn version(&self) -> u32 {
        match self {
            StoreOutcome::Unchanged(v) | StoreOutcome::Stored(v) | StoreOutcome::Stale(v) => *v,
        }
    }
}

/// Register a new pipeline as version 1
pub async fn create(db: &Database, validated: &ValidatedPipeline) -> Result<Pipeline, DbError> {
    let mut pipelines = db.tables.pipelines.write().await;

    if pipelines
        .values()
        .any(|row| row.pipeline.name == validated.name())
    {
        return Err(DbError::Conflict(format!(
            "pipeline '{}' already exists",
            validated.name()
        )));
    }

    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let pipeline = Pipeline {
        id,
        name: validated.name().to_string(),
        version: 1,
        digest: validated.digest().to_string(),
        definition: validated.definition().clone(),
        warnings: validated.warnings().to_vec(),
        created_at: now,
        updated_at: now,
    };

    let version = PipelineVersion {
        pipeline_id: id,
        version: 1,
        digest: pipeline.digest.clone(),
        definition: pipeline.definition.clone(),
        origin: VersionOrigin::Registered,
        created_at: now,
    };

    pipelines.insert(
        id,
        PipelineRow {
            pipeline: pipeline.clone(),
            versions: vec![version],
            next_sequence: 1,
            source_sequence: 0,
        },
    );

    Ok(pipeline)
}

/// Find a pipeline by ID
pub async fn find_by_id(db: &Database, id: Uuid) -> Option<Pipeline> {
    let pipelines = db.tables.pipelines.read().await;
    pipelines.get(&id).map(|row| row.pipeline.clone())
}

/// List all pipelines, newest first
pub async fn list_all(db: &Database) -> Vec<Pipeline> {
    let pipelines = db.tables.pipelines.read().await;
    let mut all: Vec<Pipeline> = pipelines.values().map(|row| row.pipeline.clone()).collect();
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    all
}

/// Delete a pipeline and its version history
pub async fn delete(db: &Database, id: Uuid) -> bool {
    let mut pipelines = db.tables.pipelines.write().await;
    pipelines.remove(&id).is_some()
}

/// Version history, oldest first
pub async fn versions(db: &Database, id: Uuid) -> Option<Vec<PipelineVersion>> {
    let pipelines = db.tables.pipelines.read().await;
    pipelines.get(&id).map(|row| row.versions.clone())
}

/// Find one version of a pipeline
pub async fn find_version(db: &Database, id: Uuid, version: u32) -> Option<PipelineVersion> {
    let pipelines = db.tables.pipelines.read().await;
    pipelines
        .get(&id)
        .and_then(|row| row.versions.iter().find(|v| v.version == version).cloned())
}

/// Store a re-derived definition as the next version
///
/// Compare-and-write under the table lock: identical content (same digest as
/// the latest version) stores nothing, and neither does a definition derived
/// from a source older than the one the latest version came from.
/// `source_sequence` is the trigger sequence of the deriving execution's source.
pub async fn store_version(
    db: &Database,
    id: Uuid,
    validated: &ValidatedPipeline,
    origin: VersionOrigin,
    source_sequence: u64,
) -> Result<StoreOutcome, DbError> {
    let mut pipelines = db.tables.pipelines.write().await;
    let row = pipelines
        .get_mut(&id)
        .ok_or_else(|| DbError::NotFound(format!("pipeline {}", id)))?;

    if row.pipeline.digest == validated.digest() {
        row.source_sequence = row.source_sequence.max(source_sequence);
        return Ok(StoreOutcome::Unchanged(row.pipeline.version));
    }

    if source_sequence < row.source_sequence {
        return Ok(StoreOutcome::Stale(row.pipeline.version));
    }

    let now = chrono::Utc::now();
    let next = row.pipeline.version + 1;

    row.versions.push(PipelineVersion {
        pipeline_id: id,
        version: next,
        digest: validated.digest().to_string(),
        definition: validated.definition().clone(),
        origin,
        created_at: now,
    });

    row.pipeline.version = next;
    row.pipeline.digest = validated.digest().to_string();
    row.pipeline.definition = validated.definition().clone();
    row.pipeline.warnings = validated.warnings().to_vec();
    row.pipeline.updated_at = now;
    row.source_sequence = source_sequence;

    Ok(StoreOutcome::Stored(next))
}

/// Reserve the next execution sequence number of a pipeline
pub async fn next_sequence(db: &Database, id: Uuid) -> Option<u64> {
    let mut pipelines = db.tables.pipelines.write().await;
    pipelines.get_mut(&id).map(|row| {
        let sequence = row.next_sequence;
        row.next_sequence += 1;
        sequence
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::pipeline::PipelineDefinition;
    use conveyor_core::validate;

    fn definition(commands: &[&str]) -> PipelineDefinition {
        serde_json::from_value(serde_json::json!({
            "name": "Demo",
            "stages": [
                {
                    "name": "Source",
                    "actions": [{
                        "name": "Checkout",
                        "outputs": ["source"],
                        "params": { "kind": "SOURCE", "repository": "demo" }
                    }]
                },
                {
                    "name": "Build",
                    "actions": [{
                        "name": "Synth",
                        "inputs": ["source"],
                        "outputs": ["synth"],
                        "params": { "kind": "BUILD", "commands": commands }
                    }]
                }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let db = Database::new();
        let validated = validate(definition(&["make"])).unwrap();

        let pipeline = create(&db, &validated).await.unwrap();
        assert_eq!(pipeline.version, 1);

        let found = find_by_id(&db, pipeline.id).await.unwrap();
        assert_eq!(found.name, "Demo");
        assert_eq!(versions(&db, pipeline.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let db = Database::new();
        let validated = validate(definition(&["make"])).unwrap();

        create(&db, &validated).await.unwrap();
        let err = create(&db, &validated).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_store_version_only_on_change() {
        let db = Database::new();
        let v1 = validate(definition(&["make"])).unwrap();
        let pipeline = create(&db, &v1).await.unwrap();
        let origin = VersionOrigin::SelfMutation {
            execution_id: Uuid::new_v4(),
        };

        let same = store_version(&db, pipeline.id, &v1, origin, 1).await.unwrap();
        assert_eq!(same, StoreOutcome::Unchanged(1));

        let v2 = validate(definition(&["make", "make test"])).unwrap();
        let stored = store_version(&db, pipeline.id, &v2, origin, 1).await.unwrap();
        assert_eq!(stored, StoreOutcome::Stored(2));

        let history = versions(&db, pipeline.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].origin, origin);
        assert_eq!(find_by_id(&db, pipeline.id).await.unwrap().version, 2);

        // Version 1 is still readable as it was
        let first = find_version(&db, pipeline.id, 1).await.unwrap();
        assert_eq!(first.digest, v1.digest());
    }

    #[tokio::test]
    async fn test_older_source_cannot_overwrite_newer_version() {
        let db = Database::new();
        let pipeline = create(&db, &validate(definition(&["make"])).unwrap())
            .await
            .unwrap();
        let origin = VersionOrigin::SelfMutation {
            execution_id: Uuid::new_v4(),
        };

        let newer = validate(definition(&["make", "make lint"])).unwrap();
        let older = validate(definition(&["make", "make test"])).unwrap();

        let stored = store_version(&db, pipeline.id, &newer, origin, 5).await.unwrap();
        assert_eq!(stored, StoreOutcome::Stored(2));

        let stale = store_version(&db, pipeline.id, &older, origin, 3).await.unwrap();
        assert_eq!(stale, StoreOutcome::Stale(2));
        assert_eq!(find_by_id(&db, pipeline.id).await.unwrap().digest, newer.digest());

        // An unchanged definition from a newer source raises the bar too
        let same = store_version(&db, pipeline.id, &newer, origin, 8).await.unwrap();
        assert_eq!(same, StoreOutcome::Unchanged(2));
        let stale = store_version(&db, pipeline.id, &older, origin, 6).await.unwrap();
        assert_eq!(stale, StoreOutcome::Stale(2));

        let later = store_version(&db, pipeline.id, &older, origin, 9).await.unwrap();
        assert_eq!(later, StoreOutcome::Stored(3));
        assert_eq!(versions(&db, pipeline.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic() {
        let db = Database::new();
        let pipeline = create(&db, &validate(definition(&["make"])).unwrap())
            .await
            .unwrap();

        assert_eq!(next_sequence(&db, pipeline.id).await, Some(1));
        assert_eq!(next_sequence(&db, pipeline.id).await, Some(2));
        assert_eq!(next_sequence(&db, Uuid::new_v4()).await, None);
    }
}
