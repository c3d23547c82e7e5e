//! Infrastructure adapters for external systems.

pub mod filesystem;
pub mod pipeline;
pub mod sqlite;
