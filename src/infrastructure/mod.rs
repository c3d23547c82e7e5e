//! Process-level plumbing used by the CLI: configuration, logging and
//! `rulesmith init` scaffolding.

pub mod config;
pub mod logging;
pub mod setup;
