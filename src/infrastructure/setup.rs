//! Project initialization for `rulesmith init`
//!
//! Creates the `.rulesmith/` directory, a commented default config file,
//! the migrated database, the pipeline work directory, and an empty rules
//! file when none exists yet.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::adapters::sqlite::{initialize_database, PoolConfig};
use crate::domain::models::RulesDocument;

/// Default configuration template content
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# rulesmith configuration
# Override settings by editing this file, adding .rulesmith/local.yaml,
# or setting environment variables with the RULESMITH_ prefix
#
# Example environment variables:
#   export RULESMITH_DATABASE__PATH=/custom/path/rulesmith.db
#   export RULESMITH_LOGGING__LEVEL=debug
#   export RULESMITH_PIPELINE__STORE_ID=shop-eu

database:
  path: ".rulesmith/rulesmith.db"
  max_connections: 5

logging:
  # trace, debug, info, warn, error
  level: "info"
  # json, pretty
  format: "pretty"

batch:
  # Largest loop count one request may ask for
  max_requested_count: 10
  default_retry_limit: 1
  # Running attempts older than this are treated as crashed
  stale_after_minutes: 90
  poll_interval_secs: 30

pipeline:
  input_path: "data/catalog.csv"
  store_id: "default"
  # Program followed by its arguments; run once per loop
  command: []
  work_dir: ".rulesmith/work"
  timeout_secs: 1800

rules:
  path: "rules/category_rules.json"

canary:
  sample_size: 200
  fixed_ratio: 0.3
  random_seed: 42
  auto_accept_threshold: 0.75
  full_apply_threshold: 0.85
  partial_apply_threshold: 0.75

harness:
  min_benchmark_sample_size: 50
  rollback_on_degrade: true
"#;

/// Setup paths and directories
pub struct SetupPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
    pub work_dir: PathBuf,
    pub rules_file: PathBuf,
}

impl SetupPaths {
    /// Get setup paths for the current directory
    pub fn new() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Ok(Self::under(&current_dir))
    }

    /// Setup paths rooted at `root`
    pub fn under(root: &Path) -> Self {
        let config_dir = root.join(".rulesmith");
        Self {
            config_file: config_dir.join("config.yaml"),
            database_file: config_dir.join("rulesmith.db"),
            work_dir: config_dir.join("work"),
            rules_file: root.join("rules/category_rules.json"),
            config_dir,
        }
    }

    /// Check if rulesmith is already initialized
    pub fn is_initialized(&self) -> bool {
        self.config_file.exists() && self.database_file.exists()
    }
}

/// Create the configuration and work directories
pub fn create_config_dir(paths: &SetupPaths) -> Result<()> {
    fs::create_dir_all(&paths.config_dir).context("Failed to create config directory")?;
    fs::create_dir_all(&paths.work_dir).context("Failed to create work directory")?;
    Ok(())
}

/// Create the default configuration file
pub fn create_config_file(paths: &SetupPaths, force: bool) -> Result<()> {
    if paths.config_file.exists() && !force {
        return Ok(());
    }

    fs::write(&paths.config_file, DEFAULT_CONFIG_TEMPLATE).context("Failed to write config file")?;
    Ok(())
}

/// Write an empty rules document unless one already exists.
///
/// Never overwritten, even with `force`: the rules file is user data.
pub fn create_rules_file(paths: &SetupPaths) -> Result<bool> {
    if paths.rules_file.exists() {
        return Ok(false);
    }
    if let Some(parent) = paths.rules_file.parent() {
        fs::create_dir_all(parent).context("Failed to create rules directory")?;
    }
    let bytes = RulesDocument::default().to_canonical_bytes()?;
    fs::write(&paths.rules_file, bytes).context("Failed to write rules file")?;
    Ok(true)
}

/// Run database migrations
pub async fn run_migrations(paths: &SetupPaths) -> Result<()> {
    let db_url = format!("sqlite:{}", paths.database_file.display());
    let config = PoolConfig {
        max_connections: 1,
        ..PoolConfig::default()
    };
    let pool = initialize_database(&db_url, Some(config))
        .await
        .context("Failed to initialize database")?;
    pool.close().await;
    Ok(())
}
