//! Implementation of the `rulesmith init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::setup::{
    create_config_dir, create_config_file, create_rules_file, run_migrations, SetupPaths,
};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite the config file with the default template
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
    pub rules_file_created: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            self.message.clone(),
            format!("  config:   {}", self.config_file.display()),
            format!("  database: {}", self.database_file.display()),
        ];
        if self.rules_file_created {
            lines.push("  created an empty rules file at rules/category_rules.json".to_string());
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir().context("Failed to get current directory")?.join(&args.path)
    };
    let paths = SetupPaths::under(&target_path);

    if paths.is_initialized() && !args.force {
        let out = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to rewrite the config file."
                .to_string(),
            initialized_path: target_path,
            config_file: paths.config_file,
            database_file: paths.database_file,
            rules_file_created: false,
        };
        output(&out, json_mode);
        return Ok(());
    }

    create_config_dir(&paths)?;
    create_config_file(&paths, args.force)?;
    let rules_file_created = create_rules_file(&paths)?;
    run_migrations(&paths).await?;
    tracing::info!(path = %target_path.display(), "project initialized");

    let out = InitOutput {
        success: true,
        message: format!("Initialized rulesmith in {}", target_path.display()),
        initialized_path: target_path,
        config_file: paths.config_file,
        database_file: paths.database_file,
        rules_file_created,
    };
    output(&out, json_mode);
    Ok(())
}
