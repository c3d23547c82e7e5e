//! tracing setup: one console layer on stderr plus an optional rotated JSON file.

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
