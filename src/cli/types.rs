//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{
    ask::AskArgs, batch::BatchArgs, change::ChangeArgs, init::InitArgs, proposal::ProposalArgs,
    worker::WorkerArgs,
};

#[derive(Parser, Debug)]
#[command(name = "rulesmith")]
#[command(
    about = "rulesmith - self-improvement loops for product categorization rules",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file to use instead of .rulesmith/config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize rulesmith configuration, database and rules file
    Init(InitArgs),

    /// Run a phrase command, e.g. "run 3 self-improvement canary loops"
    Ask(AskArgs),

    /// Batch queue commands
    Batch(BatchArgs),

    /// Run or recover the batch worker
    Worker(WorkerArgs),

    /// Applied rule changes and rollback
    Change(ChangeArgs),

    /// Rule-patch proposals
    Proposal(ProposalArgs),
}
