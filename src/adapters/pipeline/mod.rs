//! Adapters for the external categorization pipeline.

pub mod command_runner;

pub use command_runner::CommandPipelineRunner;
