//! Command-line interface.
//!
//! Parses arguments, loads configuration, initializes logging, and hands each
//! subcommand an [`context::AppContext`] wired from the configuration.

pub mod commands;
pub mod context;
pub mod id_resolver;
pub mod intent;
pub mod output;
pub mod table;
pub mod types;

pub use intent::{parse_intent, IntentError};
pub use output::handle_error;
pub use types::{Cli, Commands};

use anyhow::Result;

use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use context::{load_config, AppContext};

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        command => {
            let ctx = AppContext::open(config).await?;
            dispatch(command, &ctx, cli.json).await
        }
    }
}

async fn dispatch(command: Commands, ctx: &AppContext, json: bool) -> Result<()> {
    match command {
        Commands::Init(args) => commands::init::execute(args, json).await,
        Commands::Ask(args) => commands::ask::execute(args, ctx, json).await,
        Commands::Batch(args) => commands::batch::execute(args, ctx, json).await,
        Commands::Worker(args) => commands::worker::execute(args, ctx, json).await,
        Commands::Change(args) => commands::change::execute(args, ctx, json).await,
        Commands::Proposal(args) => commands::proposal::execute(args, ctx, json).await,
    }
}
