//! Artifact Repository
//!
//! Append-only content store. An artifact id is written once and never
//! replaced, so readers can hold on to the returned handle. Every artifact
//! belongs to one execution and is released when that execution ends.

use conveyor_core::domain::artifact::Artifact;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{ArtifactRow, Database, DbError};

/// Store an artifact owned by an execution
pub async fn put(db: &Database, owner: Uuid, artifact: Artifact) -> Result<Arc<Artifact>, DbError> {
    let mut artifacts = db.tables.artifacts.write().await;
    if artifacts.contains_key(&artifact.id) {
        return Err(DbError::Conflict(format!(
            "artifact {} is already stored",
            artifact.id
        )));
    }

    let artifact = Arc::new(artifact);
    artifacts.insert(
        artifact.id,
        ArtifactRow {
            owner,
            artifact: Arc::clone(&artifact),
        },
    );
    Ok(artifact)
}

/// Fetch an artifact by ID
pub async fn get(db: &Database, id: Uuid) -> Option<Arc<Artifact>> {
    let artifacts = db.tables.artifacts.read().await;
    artifacts.get(&id).map(|row| Arc::clone(&row.artifact))
}

/// Hand an artifact over to another execution
pub async fn transfer(db: &Database, id: Uuid, owner: Uuid) -> Result<(), DbError> {
    let mut artifacts = db.tables.artifacts.write().await;
    let row = artifacts
        .get_mut(&id)
        .ok_or_else(|| DbError::NotFound(format!("artifact {}", id)))?;
    row.owner = owner;
    Ok(())
}

/// Drop every artifact an execution owns, returning how many were removed
pub async fn release(db: &Database, owner: Uuid) -> usize {
    let mut artifacts = db.tables.artifacts.write().await;
    let before = artifacts.len();
    artifacts.retain(|_, row| row.owner != owner);
    before - artifacts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn artifact(name: &str) -> Artifact {
        Artifact::new(
            name,
            BTreeMap::from([("a.json".to_string(), b"{}".to_vec())]),
        )
    }

    #[tokio::test]
    async fn test_put_is_append_only() {
        let db = Database::new();
        let owner = Uuid::new_v4();
        let artifact = artifact("synth");

        let stored = put(&db, owner, artifact.clone()).await.unwrap();
        assert_eq!(stored.digest, artifact.digest);
        assert!(put(&db, owner, artifact.clone()).await.is_err());

        let fetched = get(&db, artifact.id).await.unwrap();
        assert_eq!(fetched.name, "synth");
    }

    #[tokio::test]
    async fn test_release_keeps_transferred_artifacts() {
        let db = Database::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let source = put(&db, first, artifact("source")).await.unwrap();
        let synth = put(&db, first, artifact("synth")).await.unwrap();
        let other = put(&db, second, artifact("other")).await.unwrap();

        transfer(&db, source.id, second).await.unwrap();
        assert_eq!(release(&db, first).await, 1);

        assert!(get(&db, synth.id).await.is_none());
        assert!(get(&db, source.id).await.is_some());
        assert!(get(&db, other.id).await.is_some());

        assert!(matches!(
            transfer(&db, synth.id, second).await,
            Err(DbError::NotFound(_))
        ));
    }
}
