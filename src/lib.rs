//! rulesmith - self-improvement control loop for product categorization rules
//!
//! rulesmith queues batches of self-improvement loops over an external
//! categorization pipeline. Each loop runs the pipeline (on a canary subset or
//! the full catalog), checks a quality gate, generates rule-patch proposals,
//! evaluates a benchmark harness, applies accepted patches to the shared
//! rules file, and rolls them back when the harness detects a regression.
//!
//! # Layout
//!
//! - `domain`: models, errors and the repository/pipeline port traits
//! - `services`: the orchestrator and worker, gating, proposals, apply and rollback
//! - `adapters`: SQLite repositories, the rules file, the pipeline command
//! - `infrastructure`: configuration, logging, project setup
//! - `cli`: the `rulesmith` command

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Batch, BatchStatus, Config, Intent, LoopType};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{BatchService, BatchWorker, Orchestrator};
