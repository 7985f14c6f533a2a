//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod approval;
mod execution;
mod pipeline;
mod stack;

pub use approval::ApprovalCommands;
pub use execution::ExecutionCommands;
pub use pipeline::PipelineCommands;
pub use stack::StackCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_core::domain::execution::ExecutionStatus;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline definitions and versions
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Execution trigger, status and logs
    Execution {
        #[command(subcommand)]
        command: ExecutionCommands,
    },
    /// Manual approval gates
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
    /// Deployed stacks
    Stack {
        #[command(subcommand)]
        command: StackCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Execution { command } => {
            execution::handle_execution_command(command, config).await
        }
        Commands::Approval { command } => approval::handle_approval_command(command, config).await,
        Commands::Stack { command } => stack::handle_stack_command(command, config).await,
    }
}

/// Colorize execution status for display
pub(crate) fn colorize_status(status: ExecutionStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        ExecutionStatus::InProgress => status_str.cyan(),
        ExecutionStatus::Succeeded => status_str.green(),
        ExecutionStatus::Failed => status_str.red(),
        ExecutionStatus::Cancelled => status_str.dimmed(),
        ExecutionStatus::Superseded => status_str.yellow(),
    }
}

pub(crate) fn timestamp(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
