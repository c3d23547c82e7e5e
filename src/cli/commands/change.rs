//! Applied change CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_change_id;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{AppliedChange, RollbackEvent, RuleDiff};

#[derive(Args, Debug)]
pub struct ChangeArgs {
    #[command(subcommand)]
    pub command: ChangeCommands,
}

#[derive(Subcommand, Debug)]
pub enum ChangeCommands {
    /// List applied rule changes, newest first
    List {
        /// Maximum number of changes to display
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show a change with its diff and rollback history
    Show {
        /// Applied change ID or unique prefix
        id: String,
    },
    /// Restore the rules file to its state before a change
    Rollback {
        /// Applied change ID or unique prefix
        id: String,
        /// Reason recorded with the rollback
        #[arg(short, long, default_value = "manual rollback")]
        reason: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ChangeListOutput {
    pub changes: Vec<AppliedChange>,
    pub total: usize,
}

impl CommandOutput for ChangeListOutput {
    fn to_human(&self) -> String {
        if self.changes.is_empty() {
            return "No applied changes found.".to_string();
        }
        format!(
            "Found {} change(s):\n{}",
            self.total,
            TableFormatter::new().format_changes(&self.changes)
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ChangeDetailOutput {
    pub change: AppliedChange,
    pub diffs: Vec<RuleDiff>,
    pub rollbacks: Vec<RollbackEvent>,
}

impl CommandOutput for ChangeDetailOutput {
    fn to_human(&self) -> String {
        let c = &self.change;
        let mut lines = vec![
            format!("Change: {}", c.id),
            format!("Proposal: {}", c.proposal_id),
            format!("Kind: {}", c.kind.as_str()),
            format!("Status: {}", c.status.as_str()),
            format!("Apply mode: {}", c.metadata.apply_mode.as_str()),
            format!("Rules version: {} -> {}", c.version_before, c.version_after),
            format!("Applied: {}", c.applied_at),
        ];
        if c.metadata.synthetic {
            lines.push("Synthetic: rules file was not modified".to_string());
        }
        for diff in &self.diffs {
            lines.push(format!(
                "  {}.{}: {} -> {}",
                diff.target_slug, diff.field, diff.before, diff.after
            ));
        }
        for event in &self.rollbacks {
            lines.push(format!("Rolled back {}: {}", event.created_at, event.reason));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RollbackOutput {
    pub success: bool,
    pub message: String,
    pub event: RollbackEvent,
}

impl CommandOutput for RollbackOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn execute(args: ChangeArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let changes = ctx.changes();

    match args.command {
        ChangeCommands::List { limit } => {
            let list = changes.list(limit).await?;
            output(&ChangeListOutput { total: list.len(), changes: list }, json_mode);
        }
        ChangeCommands::Show { id } => {
            let id = resolve_change_id(&ctx.pool, &id).await?;
            let change = changes
                .get(id)
                .await?
                .with_context(|| format!("Applied change {id} not found"))?;
            let diffs = changes.list_diffs(id).await?;
            let rollbacks = changes.list_rollback_events(id).await?;
            output(&ChangeDetailOutput { change, diffs, rollbacks }, json_mode);
        }
        ChangeCommands::Rollback { id, reason } => {
            let id = resolve_change_id(&ctx.pool, &id).await?;
            let event = ctx.rule_applier().rollback(id, &reason).await?;
            let out = RollbackOutput {
                success: true,
                message: format!(
                    "Rolled back change {id}: rules version {} -> {}",
                    event.version_before, event.version_after
                ),
                event,
            };
            output(&out, json_mode);
        }
    }
    Ok(())
}
