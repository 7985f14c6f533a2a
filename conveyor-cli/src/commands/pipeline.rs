//! Pipeline command handlers
//!
//! Validating and registering definitions, listing pipelines and their
//! version history.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::pipeline::{Pipeline, VersionOrigin};
use conveyor_core::dto::pipeline::ValidationReport;
use std::path::{Path, PathBuf};

use super::timestamp;
use crate::config::Config;
use crate::definition::load_definition;
use crate::id_resolver::resolve_pipeline_id;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Validate a definition file and print its execution plan
    Validate {
        /// Path to a TOML or JSON definition
        file: PathBuf,
    },
    /// Register a definition file as a new pipeline
    Create {
        /// Path to a TOML or JSON definition
        file: PathBuf,
    },
    /// List all pipelines
    List,
    /// Get pipeline details
    Get {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
    /// Show the version history of a pipeline
    Versions {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
    /// Delete a pipeline
    Delete {
        /// Pipeline ID, unambiguous prefix or name
        id: String,
    },
}

pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        PipelineCommands::Validate { file } => validate_pipeline(&client, &file).await,
        PipelineCommands::Create { file } => create_pipeline(&client, &file).await,
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Get { id } => get_pipeline(&client, &id).await,
        PipelineCommands::Versions { id } => list_versions(&client, &id).await,
        PipelineCommands::Delete { id } => delete_pipeline(&client, &id).await,
    }
}

async fn validate_pipeline(client: &OrchestratorClient, file: &Path) -> Result<()> {
    let definition = load_definition(file)?;
    let report = client.validate_pipeline(definition).await?;

    print_report(&report);

    if !report.valid {
        anyhow::bail!("Definition {} is invalid", file.display());
    }
    Ok(())
}

async fn create_pipeline(client: &OrchestratorClient, file: &Path) -> Result<()> {
    let definition = load_definition(file)?;
    let pipeline = client.create_pipeline(definition).await?;

    println!("{}", "✓ Pipeline created successfully!".green().bold());
    println!("  ID:      {}", pipeline.id.to_string().cyan());
    println!("  Name:    {}", pipeline.name.bold());
    println!("  Version: {}", pipeline.version);
    println!(
        "  Stages:  {}",
        stage_names(&pipeline).join(" → ").dimmed()
    );
    print_warnings(&pipeline.warnings);

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} pipeline(s):", pipelines.len()).bold()
    );
    println!();
    for pipeline in pipelines {
        println!("  {} {}", "▸".cyan(), pipeline.name.bold());
        println!("    ID:      {}", pipeline.id.to_string().dimmed());
        println!(
            "    Version: {} ({:?}, {} stages)",
            pipeline.version, pipeline.mode, pipeline.stage_count
        );
        println!("    Updated: {}", timestamp(&pipeline.updated_at).dimmed());
        println!();
    }

    Ok(())
}

async fn get_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let pipeline = client.get_pipeline(uuid).await?;

    println!("{}", "Pipeline Details:".bold());
    println!("  ID:                {}", pipeline.id.to_string().cyan());
    println!("  Name:              {}", pipeline.name.bold());
    println!("  Version:           {}", pipeline.version);
    println!("  Digest:            {}", pipeline.digest.dimmed());
    println!("  Mode:              {:?}", pipeline.definition.mode);
    println!(
        "  Restart on update: {}",
        pipeline.definition.restart_on_update
    );
    println!("  Created:           {}", timestamp(&pipeline.created_at));
    println!("  Updated:           {}", timestamp(&pipeline.updated_at));
    print_warnings(&pipeline.warnings);

    println!("\n{}", "Stages:".bold());
    for stage in &pipeline.definition.stages {
        println!("  {} {}", "▸".cyan(), stage.name.bold());
        for action in &stage.actions {
            println!(
                "    [{}] {} {}",
                action.effective_run_order(),
                action.name,
                action.kind().to_string().dimmed()
            );
        }
    }

    Ok(())
}

async fn list_versions(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let versions = client.list_versions(uuid).await?;

    println!("{}", format!("Versions of pipeline {}:", uuid).bold());
    for version in versions {
        let origin = match version.origin {
            VersionOrigin::Registered => "registered".to_string(),
            VersionOrigin::SelfMutation { execution_id } => {
                format!("self-mutation by execution {}", execution_id)
            }
        };
        println!(
            "  v{:<3} {}  {}  {}",
            version.version,
            &version.digest[..version.digest.len().min(12)],
            timestamp(&version.created_at).dimmed(),
            origin
        );
        println!("       {}", version.stages.join(" → ").dimmed());
    }

    Ok(())
}

async fn delete_pipeline(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    client.delete_pipeline(uuid).await?;

    println!(
        "{}",
        format!("✓ Pipeline {} deleted successfully!", uuid)
            .green()
            .bold()
    );

    Ok(())
}

fn stage_names(pipeline: &Pipeline) -> Vec<&str> {
    pipeline
        .definition
        .stages
        .iter()
        .map(|s| s.name.as_str())
        .collect()
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("  {} {}", "⚠".yellow(), warning.yellow());
    }
}

fn print_report(report: &ValidationReport) {
    if !report.valid {
        println!("{}", "✗ Definition is invalid".red().bold());
        if let Some(error) = &report.error {
            println!("  {}", error.red());
        }
        return;
    }

    println!("{}", "✓ Definition is valid".green().bold());
    if let Some(digest) = &report.digest {
        println!("  Digest: {}", digest.dimmed());
    }
    print_warnings(&report.warnings);

    println!("\n{}", "Execution plan:".bold());
    for stage in &report.stages {
        println!("  {} {}", "▸".cyan(), stage.name.bold());
        for partition in &stage.partitions {
            println!(
                "    run order {}: {}",
                partition.run_order,
                partition.actions.join(", ")
            );
        }
    }
}
