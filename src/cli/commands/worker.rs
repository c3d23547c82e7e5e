//! Worker CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::sync::Arc;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::BatchStatus;
use crate::domain::ports::RecoveryReport;
use crate::services::{BatchWorker, WorkerReport, WorkerSettings};

#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// Process queued batches until stopped (Ctrl-C)
    Run {
        /// Exit once the queue is empty
        #[arg(long)]
        once: bool,
    },
    /// Reclaim attempts left running by a crashed worker
    Recover,
}

#[derive(Debug, Serialize)]
pub struct ProcessedBatch {
    pub id: String,
    pub status: BatchStatus,
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Debug, Serialize)]
pub struct WorkerRunOutput {
    pub processed: Vec<ProcessedBatch>,
    pub recovered_attempts: usize,
    pub requeued_batches: usize,
}

impl From<WorkerReport> for WorkerRunOutput {
    fn from(report: WorkerReport) -> Self {
        let processed = report
            .processed
            .into_iter()
            .map(|b| ProcessedBatch {
                id: b.id.to_string(),
                status: b.status,
                succeeded: b.summary.success_count + b.summary.retried_success_count,
                failed: b.summary.final_failed_count,
            })
            .collect();
        Self {
            processed,
            recovered_attempts: report.recovered_attempts,
            requeued_batches: report.requeued_batches,
        }
    }
}

impl CommandOutput for WorkerRunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Processed {} batch(es)", self.processed.len())];
        for b in &self.processed {
            lines.push(format!(
                "  {} {}: {} succeeded, {} failed",
                b.id, b.status, b.succeeded, b.failed
            ));
        }
        if self.recovered_attempts > 0 || self.requeued_batches > 0 {
            lines.push(format!(
                "Recovered {} stale attempt(s), requeued {} batch(es)",
                self.recovered_attempts, self.requeued_batches
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RecoverOutput {
    pub recovered_attempts: Vec<String>,
    pub requeued_batches: Vec<String>,
}

impl From<RecoveryReport> for RecoverOutput {
    fn from(report: RecoveryReport) -> Self {
        Self {
            recovered_attempts: report
                .recovered_attempts
                .iter()
                .map(|a| {
                    format!(
                        "{}#{}.{} -> {}",
                        a.batch_id, a.sequence_no, a.attempt_no, a.new_status
                    )
                })
                .collect(),
            requeued_batches: report.requeued_batches.iter().map(ToString::to_string).collect(),
        }
    }
}

impl CommandOutput for RecoverOutput {
    fn to_human(&self) -> String {
        if self.recovered_attempts.is_empty() && self.requeued_batches.is_empty() {
            return "Nothing to recover.".to_string();
        }
        let mut lines = vec![format!("Recovered {} attempt(s):", self.recovered_attempts.len())];
        lines.extend(self.recovered_attempts.iter().map(|a| format!("  {a}")));
        lines.push(format!("Requeued {} batch(es)", self.requeued_batches.len()));
        lines.join("\n")
    }
}

pub async fn execute(args: WorkerArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    match args.command {
        WorkerCommands::Run { once } => {
            let settings = WorkerSettings::from_config(&ctx.config.batch, once);
            let worker = BatchWorker::new(Arc::new(ctx.orchestrator()), ctx.batches(), settings);

            let handle = worker.handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, stopping after the current batch");
                    handle.stop();
                }
            });

            let report = worker.run().await?;
            output(&WorkerRunOutput::from(report), json_mode);
        }
        WorkerCommands::Recover => {
            let report = ctx.batch_service().recover().await?;
            output(&RecoverOutput::from(report), json_mode);
        }
    }
    Ok(())
}
