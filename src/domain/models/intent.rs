//! Typed command intents.
//!
//! Free-text phrases are parsed into these at the edge; everything behind the
//! edge works with the enum only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::batch::LoopType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Queue a batch of `count` loops.
    Enqueue { count: u32, loop_type: LoopType },
    /// List all batches.
    StatusAll,
    /// Show one batch.
    StatusOne { batch_id: Uuid },
}
