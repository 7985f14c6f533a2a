//! Stack command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;

use super::timestamp;
use crate::config::Config;

/// Stack subcommands
#[derive(Subcommand)]
pub enum StackCommands {
    /// List stacks deployed through change-sets
    List,
}

pub async fn handle_stack_command(command: StackCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        StackCommands::List => {
            let stacks = client.list_stacks().await?;
            if stacks.is_empty() {
                println!("{}", "No stacks deployed.".yellow());
                return Ok(());
            }

            for stack in stacks {
                println!("  {} {}", "▸".cyan(), stack.name.bold());
                println!("    Revision:  {}", stack.revision);
                println!("    Resources: {}", stack.resource_count);
                if let Some(updated) = &stack.updated_at {
                    println!("    Updated:   {}", timestamp(updated).dimmed());
                }
            }
            Ok(())
        }
    }
}
