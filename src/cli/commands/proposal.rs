//! Proposal CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_batch_id;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{Proposal, ProposalStatus};
use crate::domain::ports::ProposalFilter;

#[derive(Args, Debug)]
pub struct ProposalArgs {
    #[command(subcommand)]
    pub command: ProposalCommands,
}

#[derive(Subcommand, Debug)]
pub enum ProposalCommands {
    /// List rule-patch proposals, newest first
    List {
        /// Only proposals from this batch (ID or prefix)
        #[arg(short, long)]
        batch: Option<String>,
        /// Only proposals from this pipeline run
        #[arg(short, long)]
        run: Option<String>,
        /// Filter by status (proposed, applied, rejected, rolled_back)
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number of proposals to display
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
}

#[derive(Debug, Serialize)]
pub struct ProposalListOutput {
    pub proposals: Vec<Proposal>,
    pub total: usize,
}

impl CommandOutput for ProposalListOutput {
    fn to_human(&self) -> String {
        if self.proposals.is_empty() {
            return "No proposals found.".to_string();
        }
        format!(
            "Found {} proposal(s):\n{}",
            self.total,
            TableFormatter::new().format_proposals(&self.proposals)
        )
    }
}

pub async fn execute(args: ProposalArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    match args.command {
        ProposalCommands::List { batch, run, status, limit } => {
            let batch_id = match batch {
                Some(prefix) => Some(resolve_batch_id(&ctx.pool, &prefix).await?),
                None => None,
            };
            let status = status
                .map(|s| {
                    ProposalStatus::from_str(&s)
                        .ok_or_else(|| anyhow!("Invalid proposal status: {s}"))
                })
                .transpose()?;

            let filter = ProposalFilter { batch_id, run_id: run, status, limit: Some(limit) };
            let proposals = ctx.proposals().list(filter).await?;
            output(&ProposalListOutput { total: proposals.len(), proposals }, json_mode);
        }
    }
    Ok(())
}
