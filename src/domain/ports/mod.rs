//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement:
//! - Repositories for batches, attempts, proposals, applied changes,
//!   benchmarks and pipeline run statistics (SQLite)
//! - RulesRepository for the shared rules file
//! - PipelineRunner and CanarySubsetBuilder for the external pipeline

pub mod applied_change_repository;
pub mod batch_repository;
pub mod benchmark_repository;
pub mod pipeline_runner;
pub mod proposal_repository;
pub mod rules_repository;
pub mod run_attempt_repository;
pub mod run_stats_repository;

pub use applied_change_repository::AppliedChangeRepository;
pub use batch_repository::{BatchRepository, RecoveredAttempt, RecoveryReport};
pub use benchmark_repository::BenchmarkRepository;
pub use pipeline_runner::{CanarySubsetBuilder, PipelineRunner};
pub use proposal_repository::{ProposalFilter, ProposalRepository};
pub use rules_repository::RulesRepository;
pub use run_attempt_repository::RunAttemptRepository;
pub use run_stats_repository::RunStatsRepository;
