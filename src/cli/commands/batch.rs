//! Batch queue CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_batch_id;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{AutoApplyPolicy, Batch, LoopType};
use crate::services::{BatchDetail, EnqueueOptions};

#[derive(Args, Debug)]
pub struct BatchArgs {
    #[command(subcommand)]
    pub command: BatchCommands,
}

#[derive(Subcommand, Debug)]
pub enum BatchCommands {
    /// Queue a batch of self-improvement loops
    Enqueue {
        /// Number of loops to run
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
        /// Loop type (canary, full)
        #[arg(short = 't', long = "type", default_value = "canary")]
        loop_type: String,
        /// Retries per loop after its first attempt
        #[arg(short, long)]
        retry_limit: Option<u32>,
        /// When proposals may be applied (never, if_gate_passes)
        #[arg(short, long)]
        policy: Option<String>,
    },
    /// List batches, newest first
    List {
        /// Maximum number of batches to display
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show a batch with its attempts
    Show {
        /// Batch ID or unique prefix
        id: String,
    },
    /// Cancel a queued or running batch
    Cancel {
        /// Batch ID or unique prefix
        id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct BatchActionOutput {
    pub success: bool,
    pub message: String,
    pub batch: Batch,
}

impl CommandOutput for BatchActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct BatchListOutput {
    pub batches: Vec<Batch>,
    pub total: usize,
}

impl CommandOutput for BatchListOutput {
    fn to_human(&self) -> String {
        if self.batches.is_empty() {
            return "No batches found.".to_string();
        }
        format!(
            "Found {} batch(es):\n{}",
            self.total,
            TableFormatter::new().format_batches(&self.batches)
        )
    }
}

#[derive(Debug, Serialize)]
pub struct BatchDetailOutput {
    #[serde(flatten)]
    pub detail: BatchDetail,
}

impl CommandOutput for BatchDetailOutput {
    fn to_human(&self) -> String {
        let batch = &self.detail.batch;
        let s = &batch.summary;
        let mut lines = vec![
            format!("Batch: {}", batch.id),
            format!("Type: {}", batch.loop_type),
            format!("Status: {}", batch.status),
            format!(
                "Loops: {}/{} (retry limit {})",
                s.completed_loops, batch.requested_count, batch.retry_limit
            ),
            format!(
                "Results: {} succeeded, {} succeeded on retry, {} failed",
                s.success_count, s.retried_success_count, s.final_failed_count
            ),
            format!("Gate pass rate: {:.2}", s.gate_pass_rate),
            format!(
                "Proposals: {} generated, {} applied ({} structural), {} rolled back",
                s.proposals_generated, s.proposals_applied, s.structural_applies, s.rollbacks
            ),
            format!("Average harness delta: {:+.4}", s.avg_harness_delta),
        ];
        if let Some(seq) = s.running_sequence {
            lines.push(format!("Running sequence: {seq}"));
        }
        if let Some(reason) = &s.recovery_reason {
            lines.push(format!("Recovered: {reason}"));
        }
        if let Some(failure) = &s.worker_failure {
            lines.push(format!("Worker failure: {} (at {})", failure.message, failure.failed_at));
        }
        if !self.detail.attempts.is_empty() {
            lines.push(String::new());
            lines.push(TableFormatter::new().format_attempts(&self.detail.attempts));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: BatchArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let service = ctx.batch_service();

    match args.command {
        BatchCommands::Enqueue { count, loop_type, retry_limit, policy } => {
            let loop_type = LoopType::from_str(&loop_type)
                .ok_or_else(|| anyhow!("Invalid loop type: {loop_type}"))?;
            let auto_apply_policy = policy
                .map(|p| {
                    AutoApplyPolicy::from_str(&p)
                        .ok_or_else(|| anyhow!("Invalid apply policy: {p}"))
                })
                .transpose()?;

            let options = EnqueueOptions {
                retry_limit,
                auto_apply_policy,
            };
            let batch = service.enqueue(count, loop_type, options).await?;
            let out = BatchActionOutput {
                success: true,
                message: format!(
                    "Queued {} {} loop(s) as batch {}",
                    batch.requested_count, batch.loop_type, batch.id
                ),
                batch,
            };
            output(&out, json_mode);
        }
        BatchCommands::List { limit } => {
            let batches = service.status_all(limit).await?;
            let out = BatchListOutput { total: batches.len(), batches };
            output(&out, json_mode);
        }
        BatchCommands::Show { id } => {
            let id = resolve_batch_id(&ctx.pool, &id).await?;
            let detail = service.status_one(id).await?;
            output(&BatchDetailOutput { detail }, json_mode);
        }
        BatchCommands::Cancel { id } => {
            let id = resolve_batch_id(&ctx.pool, &id).await?;
            let batch = service.cancel(id).await?;
            let out = BatchActionOutput {
                success: true,
                message: format!("Batch {id} cancelled"),
                batch,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
