//! Approval command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::approval::Decision;

use super::timestamp;
use crate::config::Config;
use crate::id_resolver::resolve_execution_id;

/// Approval subcommands
#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List gates waiting for a decision
    Pending,
    /// Approve a pending gate
    Approve {
        /// Execution ID or unambiguous prefix
        execution: String,
        /// Name of the APPROVAL action
        action: String,
        #[command(flatten)]
        decision: DecisionArgs,
    },
    /// Reject a pending gate
    Reject {
        /// Execution ID or unambiguous prefix
        execution: String,
        /// Name of the APPROVAL action
        action: String,
        #[command(flatten)]
        decision: DecisionArgs,
    },
}

#[derive(clap::Args)]
pub struct DecisionArgs {
    /// Who takes the decision
    #[arg(long, env = "CONVEYOR_ACTOR", default_value = "cli")]
    actor: String,

    /// Free-form comment stored with the decision
    #[arg(short, long)]
    comment: Option<String>,
}

pub async fn handle_approval_command(command: ApprovalCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        ApprovalCommands::Pending => list_pending(&client).await,
        ApprovalCommands::Approve {
            execution,
            action,
            decision,
        } => decide(&client, &execution, &action, Decision::Approved, decision).await,
        ApprovalCommands::Reject {
            execution,
            action,
            decision,
        } => decide(&client, &execution, &action, Decision::Rejected, decision).await,
    }
}

async fn list_pending(client: &OrchestratorClient) -> Result<()> {
    let pending = client.list_pending_approvals().await?;

    if pending.is_empty() {
        println!("{}", "No approvals pending.".yellow());
        return Ok(());
    }

    for gate in pending {
        println!(
            "  {} {} / {} / {}",
            "▸".cyan(),
            gate.pipeline_name.bold(),
            gate.stage,
            gate.action.bold()
        );
        println!("    Execution: {}", gate.execution_id.to_string().dimmed());
        println!("    Requested: {}", timestamp(&gate.requested_at));
        println!("    Deadline:  {}", timestamp(&gate.deadline).yellow());
        if let Some(summary) = &gate.summary {
            println!("    {}", summary);
        }
    }

    Ok(())
}

async fn decide(
    client: &OrchestratorClient,
    execution: &str,
    action: &str,
    decision: Decision,
    args: DecisionArgs,
) -> Result<()> {
    let execution_id = resolve_execution_id(client, execution).await?;
    let gate = client
        .decide_approval(execution_id, action, decision, args.actor, args.comment)
        .await?;

    let message = match decision {
        Decision::Approved => format!("✓ {} approved", gate.action).green().bold(),
        Decision::Rejected => format!("✗ {} rejected", gate.action).red().bold(),
    };
    println!("{}", message);
    println!("  Execution: {}", execution_id.to_string().dimmed());

    Ok(())
}
