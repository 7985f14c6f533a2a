//! Execution command handlers
//!
//! Triggering executions and inspecting their stages, failure cause and logs.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::execution::{ActionStatus, Execution, StageStatus};
use conveyor_core::domain::log::{LogEntry, LogLevel};
use conveyor_core::dto::execution::{ExecutionSummary, TriggerExecution};
use std::path::PathBuf;
use std::time::Duration;

use super::{colorize_status, timestamp};
use crate::config::Config;
use crate::definition::snapshot_dir;
use crate::id_resolver::{resolve_execution_id, resolve_pipeline_id};

/// Execution subcommands
#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Start an execution from a source revision
    Trigger {
        /// Pipeline ID, unambiguous prefix or name
        pipeline: String,

        /// Branch the revision was pushed to
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Commit id of the revision
        #[arg(short, long)]
        commit: String,

        /// Upload this checkout instead of letting the orchestrator snapshot its own
        #[arg(long)]
        source_dir: Option<PathBuf>,

        /// Poll until the execution finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// List executions
    List {
        /// Only executions of this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Get execution details, including the failure cause
    Get {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// Print the execution log
    Logs {
        /// Execution ID or unambiguous prefix
        id: String,
    },
    /// Cancel a running execution
    Cancel {
        /// Execution ID or unambiguous prefix
        id: String,
    },
}

pub async fn handle_execution_command(command: ExecutionCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        ExecutionCommands::Trigger {
            pipeline,
            branch,
            commit,
            source_dir,
            wait,
        } => trigger(&client, &pipeline, branch, commit, source_dir, wait).await,
        ExecutionCommands::List { pipeline } => list_executions(&client, pipeline).await,
        ExecutionCommands::Get { id } => get_execution(&client, &id).await,
        ExecutionCommands::Logs { id } => get_logs(&client, &id).await,
        ExecutionCommands::Cancel { id } => cancel(&client, &id).await,
    }
}

async fn trigger(
    client: &OrchestratorClient,
    pipeline: &str,
    branch: String,
    commit: String,
    source_dir: Option<PathBuf>,
    wait: bool,
) -> Result<()> {
    let pipeline_id = resolve_pipeline_id(client, pipeline).await?;

    let files = match source_dir {
        Some(dir) => {
            let (files, skipped) = snapshot_dir(&dir)?;
            for path in skipped {
                println!("  {} skipping non-UTF-8 file {}", "⚠".yellow(), path.dimmed());
            }
            Some(files)
        }
        None => None,
    };

    let execution = client
        .trigger_pipeline(
            pipeline_id,
            TriggerExecution {
                branch,
                commit,
                files,
            },
        )
        .await?;

    println!("{}", "✓ Execution started".green().bold());
    println!("  ID:       {}", execution.id.to_string().cyan());
    println!(
        "  Pipeline: {} #{}",
        execution.pipeline_name.bold(),
        execution.sequence
    );
    println!("  Version:  {}", execution.version);

    if !wait {
        return Ok(());
    }

    let mut last_stage = None;
    loop {
        let current = client
            .get_execution(execution.id)
            .await
            .context("Failed to poll execution")?;

        if current.current_stage != last_stage {
            if let Some(stage) = &current.current_stage {
                println!("  {} {}", "→".cyan(), stage);
            }
            last_stage = current.current_stage.clone();
        }

        if current.status.is_terminal() {
            println!();
            print_execution_details(&current);
            return Ok(());
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn list_executions(client: &OrchestratorClient, pipeline: Option<String>) -> Result<()> {
    let executions = match pipeline {
        Some(pipeline) => {
            let pipeline_id = resolve_pipeline_id(client, &pipeline).await?;
            client.list_executions_by_pipeline(pipeline_id).await?
        }
        None => client.list_executions().await?,
    };

    if executions.is_empty() {
        println!("{}", "No executions found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} execution(s):", executions.len()).bold()
    );
    println!();
    for execution in executions {
        print_execution_summary(&execution);
    }

    Ok(())
}

async fn get_execution(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_execution_id(client, id).await?;
    let execution = client.get_execution(uuid).await?;

    print_execution_details(&execution);
    Ok(())
}

async fn get_logs(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_execution_id(client, id).await?;
    let logs = client.get_execution_logs(uuid).await?;

    if logs.is_empty() {
        println!("{}", "No logs found for this execution.".yellow());
        return Ok(());
    }

    println!("{}", format!("Logs for execution {}:", uuid).bold());
    println!("{}", "─".repeat(80).dimmed());
    for log in logs {
        print_log_entry(&log);
    }
    println!("{}", "─".repeat(80).dimmed());

    Ok(())
}

async fn cancel(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_execution_id(client, id).await?;
    client.cancel_execution(uuid).await?;

    println!(
        "{}",
        format!("✓ Cancellation requested for execution {}", uuid)
            .green()
            .bold()
    );
    println!(
        "{}",
        "  It stops at the next stage boundary or pending approval.".dimmed()
    );

    Ok(())
}

fn print_execution_summary(execution: &ExecutionSummary) {
    println!(
        "  {} {} #{} {}",
        "▸".cyan(),
        execution.pipeline_name.bold(),
        execution.sequence,
        colorize_status(execution.status)
    );
    println!("    ID:      {}", execution.id.to_string().dimmed());
    println!(
        "    Commit:  {} (v{})",
        execution.commit, execution.version
    );
    if let Some(stage) = &execution.current_stage {
        println!("    Stage:   {}", stage);
    }
    println!("    Started: {}", timestamp(&execution.started_at).dimmed());
    if let Some(cause) = &execution.failure {
        println!("    Cause:   {}", cause.to_string().red());
    }
    println!();
}

fn print_execution_details(execution: &Execution) {
    println!("{}", "Execution Details:".bold());
    println!("  ID:       {}", execution.id.to_string().cyan());
    println!(
        "  Pipeline: {} #{} (v{})",
        execution.pipeline_name.bold(),
        execution.sequence,
        execution.version
    );
    println!("  Status:   {}", colorize_status(execution.status));
    println!(
        "  Trigger:  {}@{}",
        execution.trigger.branch, execution.trigger.commit
    );
    println!("  Started:  {}", timestamp(&execution.started_at));
    if let Some(completed) = &execution.completed_at {
        let seconds = completed
            .signed_duration_since(execution.started_at)
            .num_seconds();
        println!("  Finished: {} ({}s)", timestamp(completed), seconds);
    }
    if let Some(previous) = execution.restart_of {
        println!("  Restart of:    {}", previous.to_string().dimmed());
    }
    if let Some(next) = execution.superseded_by {
        println!("  Superseded by: {}", next.to_string().yellow());
    }

    println!("\n{}", "Stages:".bold());
    for stage in &execution.stages {
        let status = format!("{:?}", stage.status);
        let status = match stage.status {
            StageStatus::InProgress => status.cyan(),
            StageStatus::Succeeded => status.green(),
            StageStatus::Failed => status.red(),
            StageStatus::Cancelled => status.dimmed(),
        };
        println!("  {} {} {}", "▸".cyan(), stage.name.bold(), status);

        for action in &stage.actions {
            let marker = match action.status {
                ActionStatus::Succeeded => "✓".green(),
                ActionStatus::Failed => "✗".red(),
                ActionStatus::InProgress => "…".cyan(),
                ActionStatus::Discarded | ActionStatus::Skipped => "-".dimmed(),
            };
            println!(
                "    {} [{}] {} {}",
                marker,
                action.run_order,
                action.name,
                format!("{:?}", action.status).dimmed()
            );
            if let Some(message) = &action.message {
                println!("        {}", message.dimmed());
            }
        }
    }

    if let Some(cause) = &execution.failure {
        println!("\n{}", "Failure:".bold());
        println!("  Stage:  {}", cause.stage);
        if let Some(action) = &cause.action {
            println!("  Action: {}", action);
        }
        println!("  Cause:  {}", cause.kind.to_string().red());
        println!("  {}", cause.message.red());
    }
}

fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    match &log.source {
        Some(source) => println!(
            "{} [{}] {} {}",
            log.timestamp.format("%H:%M:%S").to_string().dimmed(),
            level_colored,
            source.dimmed(),
            log.message
        ),
        None => println!(
            "{} [{}] {}",
            log.timestamp.format("%H:%M:%S").to_string().dimmed(),
            level_colored,
            log.message
        ),
    }
}
