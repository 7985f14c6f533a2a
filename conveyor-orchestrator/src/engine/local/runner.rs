//! Shell command runner
//!
//! Materialises the input files in a temporary workspace, runs each command
//! through `sh -c`, and collects the output artifact from the workspace.

use async_trait::async_trait;
use conveyor_core::BuildError;
use conveyor_core::domain::artifact::is_contained_path;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::collaborators::{CommandRunner, CommandSpec, FileMap};
use crate::engine::log_buffer::ActionLog;

/// Lines of output kept in a failed command's error
const LOG_TAIL_LINES: usize = 20;

pub struct ShellCommandRunner {
    /// Exported to every command
    env: BTreeMap<String, String>,
}

impl ShellCommandRunner {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        workspace: &FileMap,
        log: &ActionLog,
    ) -> Result<FileMap, BuildError> {
        let dir = tempfile::tempdir().map_err(|e| BuildError::Workspace(e.to_string()))?;
        debug!("Created build workspace at {}", dir.path().display());

        materialize(dir.path(), workspace).await?;

        for command in spec.install_commands.iter().chain(spec.commands.iter()) {
            run_command(dir.path(), command, &self.env, &spec.env, log).await?;
        }

        let base = match &spec.base_directory {
            Some(base) if !is_contained_path(base.trim_matches('/')) => {
                return Err(BuildError::Workspace(format!(
                    "base directory '{}' leaves the workspace",
                    base
                )));
            }
            Some(base) => dir.path().join(base.trim_matches('/')),
            None => dir.path().to_path_buf(),
        };

        if !base.is_dir() {
            return Err(BuildError::MissingOutput(
                spec.base_directory.clone().unwrap_or_else(|| ".".to_string()),
            ));
        }

        let patterns = spec.files.clone();
        let output = tokio::task::spawn_blocking(move || collect(&base, &patterns))
            .await
            .map_err(|e| BuildError::Workspace(format!("output collection failed: {}", e)))??;

        info!("Build produced {} file(s)", output.len());
        Ok(output)
    }
}

async fn materialize(root: &Path, files: &FileMap) -> Result<(), BuildError> {
    if let Some(path) = files.keys().find(|path| !is_contained_path(path)) {
        return Err(BuildError::Workspace(format!(
            "input path '{}' leaves the workspace",
            path
        )));
    }

    for (path, content) in files {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BuildError::Workspace(e.to_string()))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| BuildError::Workspace(format!("failed to write '{}': {}", path, e)))?;
    }
    Ok(())
}

async fn run_command(
    cwd: &Path,
    command: &str,
    base_env: &BTreeMap<String, String>,
    env: &BTreeMap<String, String>,
    log: &ActionLog,
) -> Result<(), BuildError> {
    log.info(format!("$ {}", command));

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(base_env)
        .envs(env)
        .output()
        .await
        .map_err(|e| BuildError::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    for line in stdout.lines() {
        log.info(line);
    }
    for line in stderr.lines() {
        log.warning(line);
    }

    if !output.status.success() {
        let exit_code = output.status.code().unwrap_or(-1);
        log.error(format!("command exited with code {}", exit_code));

        let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
        let tail = lines[lines.len().saturating_sub(LOG_TAIL_LINES)..].join("\n");

        return Err(BuildError::CommandFailed {
            command: command.to_string(),
            exit_code,
            log_tail: tail,
        });
    }

    Ok(())
}

fn collect(base: &Path, patterns: &[String]) -> Result<FileMap, BuildError> {
    let mut builder = OverrideBuilder::new(base);
    for pattern in patterns {
        builder
            .add(pattern)
            .map_err(|e| BuildError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
    }
    let overrides = builder.build().map_err(|e| BuildError::InvalidPattern {
        pattern: patterns.join(","),
        reason: e.to_string(),
    })?;

    let mut files = FileMap::new();

    for result in WalkBuilder::new(base)
        .standard_filters(false)
        .overrides(overrides)
        .build()
    {
        let entry = result.map_err(|e| BuildError::Workspace(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let relative = path.strip_prefix(base).unwrap_or(path);
        let content = std::fs::read(path).map_err(|e| BuildError::Workspace(e.to_string()))?;
        files.insert(relative.to_string_lossy().replace('\\', "/"), content);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::log_buffer::{InMemoryLogBuffer, LogBufferService};
    use std::sync::Arc;

    fn log() -> (InMemoryLogBuffer, ActionLog) {
        let buffer = InMemoryLogBuffer::new();
        let log = ActionLog::new(Arc::new(buffer.clone()), Some("Build/Synth".to_string()));
        (buffer, log)
    }

    #[tokio::test]
    async fn test_runs_commands_and_collects_output() {
        let runner = ShellCommandRunner::new(BTreeMap::from([(
            "CONVEYOR_ACCOUNT".to_string(),
            "123456789012".to_string(),
        )]));
        let spec = CommandSpec {
            commands: vec![
                "mkdir -p cdk.out/assembly".to_string(),
                "cp app.txt cdk.out/assembly/app.txt".to_string(),
                "echo $CONVEYOR_ACCOUNT > cdk.out/account.txt".to_string(),
                "echo ignored > cdk.out/notes.md".to_string(),
            ],
            base_directory: Some("cdk.out".to_string()),
            files: vec!["**/*.txt".to_string()],
            ..Default::default()
        };
        let workspace = FileMap::from([("app.txt".to_string(), b"hello".to_vec())]);
        let (buffer, log) = log();

        let output = runner.run(&spec, &workspace, &log).await.unwrap();

        assert_eq!(output.get("assembly/app.txt"), Some(&b"hello".to_vec()));
        assert_eq!(output.get("account.txt"), Some(&b"123456789012\n".to_vec()));
        assert!(!output.contains_key("notes.md"));
        assert!(buffer.drain().iter().any(|e| e.message.starts_with("$ mkdir")));
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let runner = ShellCommandRunner::new(BTreeMap::new());
        let spec = CommandSpec {
            commands: vec![
                "echo before".to_string(),
                "exit 3".to_string(),
                "touch never".to_string(),
            ],
            ..Default::default()
        };
        let (buffer, log) = log();

        let err = runner.run(&spec, &FileMap::new(), &log).await.unwrap_err();
        match err {
            BuildError::CommandFailed {
                command, exit_code, ..
            } => {
                assert_eq!(command, "exit 3");
                assert_eq!(exit_code, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!buffer.drain().iter().any(|e| e.message.contains("touch")));
    }

    #[tokio::test]
    async fn test_missing_base_directory() {
        let runner = ShellCommandRunner::new(BTreeMap::new());
        let spec = CommandSpec {
            commands: vec!["true".to_string()],
            base_directory: Some("cdk.out".to_string()),
            ..Default::default()
        };
        let (_, log) = log();

        let err = runner.run(&spec, &FileMap::new(), &log).await.unwrap_err();
        assert_eq!(err, BuildError::MissingOutput("cdk.out".to_string()));
    }

    #[tokio::test]
    async fn test_inputs_cannot_escape_workspace() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("workspace");
        let files = FileMap::from([
            ("ok.txt".to_string(), b"fine".to_vec()),
            ("../escaped.txt".to_string(), b"nope".to_vec()),
        ]);

        let err = materialize(&root, &files).await.unwrap_err();
        assert!(matches!(err, BuildError::Workspace(ref m) if m.contains("../escaped.txt")));
        assert!(!outer.path().join("escaped.txt").exists());
        assert!(!root.join("ok.txt").exists());
    }

    #[tokio::test]
    async fn test_base_directory_cannot_escape_workspace() {
        let runner = ShellCommandRunner::new(BTreeMap::new());
        let spec = CommandSpec {
            commands: vec!["true".to_string()],
            base_directory: Some("../..".to_string()),
            ..Default::default()
        };
        let (_, log) = log();

        let err = runner.run(&spec, &FileMap::new(), &log).await.unwrap_err();
        assert!(matches!(err, BuildError::Workspace(_)));
    }
}
