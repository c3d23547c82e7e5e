//! Phrase parsing for `rulesmith ask`.
//!
//! Recognized phrases (case and extra whitespace ignored):
//! - `run N self-improvement canary loop(s)` / `run N self-improvement full loop(s)`
//! - `show self-improvement batches`
//! - `show self-improvement batch <batch-id>`

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{Intent, LoopType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("Unrecognized phrase: '{0}'")]
    Unrecognized(String),

    #[error("Requested count {count} exceeds max allowed {max}")]
    ExceedsMax { count: u32, max: u32 },

    #[error("Requested count must be at least 1")]
    ZeroCount,

    #[error("Invalid batch id '{0}'")]
    InvalidBatchId(String),
}

/// Parse a free-text phrase into a typed [`Intent`].
pub fn parse_intent(phrase: &str, max_count: u32) -> Result<Intent, IntentError> {
    let normalized = phrase.trim().trim_end_matches(['.', '!']).to_lowercase();
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let unrecognized = || IntentError::Unrecognized(phrase.trim().to_string());

    match words.as_slice() {
        ["run", count, "self-improvement", loop_type, "loop" | "loops"] => {
            let loop_type = LoopType::from_str(loop_type).ok_or_else(unrecognized)?;
            let count: u32 = count.parse().map_err(|_| unrecognized())?;
            if count == 0 {
                return Err(IntentError::ZeroCount);
            }
            if count > max_count {
                return Err(IntentError::ExceedsMax { count, max: max_count });
            }
            Ok(Intent::Enqueue { count, loop_type })
        }
        ["show", "self-improvement", "batches"] => Ok(Intent::StatusAll),
        ["show", "self-improvement", "batch", id] => Uuid::parse_str(id)
            .map(|batch_id| Intent::StatusOne { batch_id })
            .map_err(|_| IntentError::InvalidBatchId((*id).to_string())),
        _ => Err(unrecognized()),
    }
}
