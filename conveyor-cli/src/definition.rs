//! Local files handed to the orchestrator
//!
//! Pipeline definitions are read as TOML (`.toml`) or JSON (anything else).
//! `--source-dir` checkouts are snapshotted into inline UTF-8 files, honouring
//! `.gitignore` the same way the orchestrator's directory source does.

use anyhow::{Context, Result, bail};
use conveyor_core::domain::pipeline::PipelineDefinition;
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::path::Path;

/// Read a pipeline definition file
pub fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file: {}", path.display()))?;

    let definition = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML definition: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON definition: {}", path.display()))?
    };

    Ok(definition)
}

/// Snapshot of a checkout, keyed by `/`-separated relative path
///
/// Binary files are skipped; the returned list names them.
pub fn snapshot_dir(root: &Path) -> Result<(BTreeMap<String, String>, Vec<String>)> {
    if !root.is_dir() {
        bail!("Source directory {} does not exist", root.display());
    }

    let mut files = BTreeMap::new();
    let mut skipped = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = entry.context("Failed to walk source directory")?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .context("Walked outside the source directory")?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;

        match String::from_utf8(bytes) {
            Ok(content) => {
                files.insert(relative, content);
            }
            Err(_) => skipped.push(relative),
        }
    }

    Ok((files, skipped))
}
