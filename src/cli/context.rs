//! Wiring from configuration to repositories and services.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::filesystem::{CsvCanarySubsetBuilder, FileRulesRepository};
use crate::adapters::pipeline::CommandPipelineRunner;
use crate::adapters::sqlite::{
    initialize_database, PoolConfig, SqliteAppliedChangeRepository, SqliteBatchRepository,
    SqliteBenchmarkRepository, SqliteProposalRepository, SqliteRunAttemptRepository,
    SqliteRunStatsRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{
    AppliedChangeRepository, BatchRepository, ProposalRepository, RulesRepository,
    RunAttemptRepository, RunStatsRepository,
};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{
    AttemptExecutor, BatchService, ExecutorPorts, Orchestrator, RulePatchApplier,
};

/// Load configuration from an explicit file or the default hierarchy.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// An open database plus the configuration everything is built from.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    rules: Arc<dyn RulesRepository>,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        let pool_config = PoolConfig::from(&config.database);
        let pool = initialize_database(&config.database.url(), Some(pool_config))
            .await
            .context("Failed to initialize database. Run 'rulesmith init' first.")?;
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: Config, pool: SqlitePool) -> Self {
        let rules: Arc<dyn RulesRepository> =
            Arc::new(FileRulesRepository::new(&config.rules.path));
        Self { config, pool, rules }
    }

    pub fn batches(&self) -> Arc<dyn BatchRepository> {
        Arc::new(SqliteBatchRepository::new(self.pool.clone()))
    }

    pub fn attempts(&self) -> Arc<dyn RunAttemptRepository> {
        Arc::new(SqliteRunAttemptRepository::new(self.pool.clone()))
    }

    pub fn proposals(&self) -> Arc<dyn ProposalRepository> {
        Arc::new(SqliteProposalRepository::new(self.pool.clone()))
    }

    pub fn changes(&self) -> Arc<dyn AppliedChangeRepository> {
        Arc::new(SqliteAppliedChangeRepository::new(self.pool.clone()))
    }

    pub fn batch_service(&self) -> BatchService {
        BatchService::new(self.batches(), self.attempts(), self.config.batch.clone())
    }

    pub fn rule_applier(&self) -> RulePatchApplier {
        RulePatchApplier::new(self.rules.clone(), self.changes())
    }

    /// Orchestrator driving the configured pipeline command.
    pub fn orchestrator(&self) -> Orchestrator {
        let run_stats: Arc<dyn RunStatsRepository> =
            Arc::new(SqliteRunStatsRepository::new(self.pool.clone()));
        let canary_dir = Path::new(&self.config.pipeline.work_dir).join("canary");
        let ports = ExecutorPorts {
            pipeline: Arc::new(CommandPipelineRunner::new(
                &self.config.pipeline,
                run_stats.clone(),
            )),
            subsets: Arc::new(CsvCanarySubsetBuilder::new(canary_dir)),
            run_stats,
            proposals: self.proposals(),
            benchmarks: Arc::new(SqliteBenchmarkRepository::new(self.pool.clone())),
            rules: self.rules.clone(),
            changes: self.changes(),
        };
        let executor = AttemptExecutor::new(ports, &self.config);
        Orchestrator::new(self.batches(), self.attempts(), Arc::new(executor))
    }
}
