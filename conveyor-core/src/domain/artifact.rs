//! Artifact domain types
//!
//! Artifacts are immutable bundles of files produced by one action and read
//! by later ones. Actions pass them around by id; content lives in the store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use uuid::Uuid;

/// Identifies the action that produced an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionAddress {
    pub stage: String,
    pub action: String,
}

impl ActionAddress {
    pub fn new(stage: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for ActionAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stage, self.action)
    }
}

/// Artifact content handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    /// Declared artifact name within the pipeline
    pub name: String,
    pub produced_by: Option<ActionAddress>,
    /// Relative file path -> content
    pub files: BTreeMap<String, Vec<u8>>,
    pub digest: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Artifact {
    /// Creates a new artifact with a fresh id and computed digest
    pub fn new(name: impl Into<String>, files: BTreeMap<String, Vec<u8>>) -> Self {
        let files: BTreeMap<String, Vec<u8>> = files
            .into_iter()
            .map(|(path, content)| (normalize_path(&path), content))
            .collect();
        let digest = digest_files(&files);

        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            produced_by: None,
            files,
            digest,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn produced_by(mut self, address: ActionAddress) -> Self {
        self.produced_by = Some(address);
        self
    }

    /// Looks up a single file inside the artifact
    pub fn at_path(&self, path: &str) -> Option<&[u8]> {
        self.files.get(&normalize_path(path)).map(|c| c.as_slice())
    }

    /// Selects the files addressed by a sub-path
    ///
    /// An exact file match yields that single file keyed by its file name;
    /// otherwise the path is treated as a directory and its files are
    /// re-rooted. `None` means the path addresses nothing.
    pub fn select(&self, path: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        let path = normalize_path(path);

        if let Some(content) = self.files.get(&path) {
            let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
            return Some(BTreeMap::from([(file_name, content.clone())]));
        }

        let prefix = format!("{}/", path);
        let selected: BTreeMap<String, Vec<u8>> = self
            .files
            .iter()
            .filter_map(|(p, c)| p.strip_prefix(&prefix).map(|rel| (rel.to_string(), c.clone())))
            .collect();

        if selected.is_empty() {
            None
        } else {
            Some(selected)
        }
    }

    pub fn total_size(&self) -> usize {
        self.files.values().map(|c| c.len()).sum()
    }

    /// First file path that would land outside a directory it is unpacked into
    pub fn escaping_path(&self) -> Option<&str> {
        self.files
            .keys()
            .map(String::as_str)
            .find(|path| !is_contained_path(path))
    }
}

/// Whether a relative path stays inside the directory it is joined onto
///
/// Only plain name components are allowed: no `..`, no root and no prefix.
pub fn is_contained_path(path: &str) -> bool {
    let path = Path::new(path);
    path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Content digest over paths and bytes
pub fn digest_files(files: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_be_bytes());
        hasher.update(content);
    }
    hex::encode(hasher.finalize())
}

fn normalize_path(path: &str) -> String {
    path.trim_start_matches("./")
        .trim_matches('/')
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_output() -> Artifact {
        Artifact::new(
            "synth",
            BTreeMap::from([
                ("manifest.json".to_string(), b"{}".to_vec()),
                (
                    "assembly-App/SQSStack.template.json".to_string(),
                    b"{\"Resources\":{}}".to_vec(),
                ),
                ("assembly-App/asset.zip".to_string(), vec![1, 2, 3]),
            ]),
        )
    }

    #[test]
    fn test_at_path() {
        let artifact = synth_output();
        assert_eq!(artifact.at_path("manifest.json"), Some(&b"{}"[..]));
        assert_eq!(artifact.at_path("./manifest.json"), Some(&b"{}"[..]));
        assert!(artifact.at_path("missing.json").is_none());
    }

    #[test]
    fn test_select_directory() {
        let artifact = synth_output();
        let selected = artifact.select("assembly-App").unwrap();
        assert_eq!(selected.len(), 2);
        assert!(selected.contains_key("SQSStack.template.json"));
        assert!(selected.contains_key("asset.zip"));
    }

    #[test]
    fn test_select_single_file() {
        let artifact = synth_output();
        let selected = artifact.select("assembly-App/asset.zip").unwrap();
        assert_eq!(selected.get("asset.zip"), Some(&vec![1, 2, 3]));
        assert!(artifact.select("nothing-here").is_none());
    }

    #[test]
    fn test_escaping_paths_are_reported() {
        assert!(synth_output().escaping_path().is_none());
        assert!(is_contained_path("cdk.out/manifest.json"));
        assert!(!is_contained_path("../outside.txt"));
        assert!(!is_contained_path("cdk.out/../../outside.txt"));
        assert!(!is_contained_path(""));

        // Leading slashes are trimmed, parent segments are kept
        let artifact = Artifact::new(
            "source",
            BTreeMap::from([
                ("/etc/passwd".to_string(), Vec::new()),
                ("src/../../escape.txt".to_string(), Vec::new()),
            ]),
        );
        assert!(artifact.at_path("etc/passwd").is_some());
        assert_eq!(artifact.escaping_path(), Some("src/../../escape.txt"));
    }

    #[test]
    fn test_digest_depends_on_content() {
        let a = synth_output();
        let b = synth_output();
        assert_ne!(a.id, b.id);
        assert_eq!(a.digest, b.digest);

        let c = Artifact::new("synth", BTreeMap::from([("manifest.json".to_string(), b"[]".to_vec())]));
        assert_ne!(a.digest, c.digest);
    }
}
