//! Directory source
//!
//! Snapshots a local checkout into a source artifact, honouring `.gitignore`
//! and `.ignore` files the way a clone would leave untracked files out.

use async_trait::async_trait;
use conveyor_core::domain::artifact::Artifact;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::engine::collaborators::{FileMap, SourceError, SourceProvider};

pub struct DirectorySource {
    root: Option<PathBuf>,
}

impl DirectorySource {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl SourceProvider for DirectorySource {
    async fn notify(&self, branch: &str, commit: &str) -> Result<Artifact, SourceError> {
        let root = self.root.clone().ok_or_else(|| {
            SourceError::Unavailable(
                "no source directory configured; include files in the trigger".to_string(),
            )
        })?;

        info!(
            root = %root.display(),
            branch,
            commit,
            "Snapshotting source directory"
        );

        let files = tokio::task::spawn_blocking(move || snapshot(&root))
            .await
            .map_err(|e| SourceError::Unavailable(format!("snapshot task failed: {}", e)))??;

        debug!("Source snapshot holds {} file(s)", files.len());
        Ok(Artifact::new("source", files))
    }
}

fn snapshot(root: &Path) -> Result<FileMap, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::Unavailable(format!(
            "'{}' is not a directory",
            root.display()
        )));
    }

    let mut files = FileMap::new();

    for result in WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build()
    {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "Failed to read directory entry");
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let content = std::fs::read(path).map_err(|e| {
            SourceError::Unavailable(format!("failed to read '{}': {}", path.display(), e))
        })?;

        files.insert(relative.to_string_lossy().replace('\\', "/"), content);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_respects_ignore_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "node_modules/\n").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/stack.ts"), "export {}").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/aws-cdk")).unwrap();
        std::fs::write(dir.path().join("node_modules/aws-cdk/index.js"), "").unwrap();

        let source = DirectorySource::new(Some(dir.path().to_path_buf()));
        let artifact = source.notify("main", "abc123").await.unwrap();

        assert!(artifact.at_path("package.json").is_some());
        assert!(artifact.at_path("lib/stack.ts").is_some());
        assert!(artifact.at_path("node_modules/aws-cdk/index.js").is_none());
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let source = DirectorySource::new(None);
        assert!(source.notify("main", "abc123").await.is_err());
    }
}
