//! Loads `Config` from built-in defaults, `.rulesmith/config.yaml` and
//! `RULESMITH_*` environment variables, later sources winning.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
