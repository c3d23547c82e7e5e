//! CLI command implementations.

pub mod ask;
pub mod batch;
pub mod change;
pub mod init;
pub mod proposal;
pub mod worker;
