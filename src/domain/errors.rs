//! Domain errors for the rulesmith control loop.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the self-improvement loop.
///
/// Gate and harness rejections are never represented here: they are ordinary
/// values carrying failed-metric names. These variants are runtime failures.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Run attempt not found: batch {batch_id} sequence {sequence_no} attempt {attempt_no}")]
    RunAttemptNotFound {
        batch_id: Uuid,
        sequence_no: u32,
        attempt_no: u32,
    },

    #[error("Proposal not found: {0}")]
    ProposalNotFound(Uuid),

    #[error("Applied change not found: {0}")]
    AppliedChangeNotFound(Uuid),

    #[error("Pipeline run not found: {0}")]
    PipelineRunNotFound(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Rules file changed underneath us: expected version {expected}, found {actual}")]
    RulesVersionConflict { expected: String, actual: String },

    #[error("Rules storage error: {0}")]
    RulesStorage(String),

    #[error("Rules file no longer matches the database: {cause}; restore failed: {restore_error}")]
    RulesDiverged { cause: String, restore_error: String },

    #[error("Patch rejected: {0}")]
    PatchRejected(String),

    #[error("Pipeline failed: {0}")]
    PipelineFailed(String),

    #[error("Run {run_id} produced no {kind} artifact")]
    MissingArtifact { run_id: String, kind: String },

    #[error("Canary subset build failed: {0}")]
    CanarySubsetFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Errors that leave shared state inconsistent. Retrying the attempt
    /// cannot help, so the whole batch stops.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RulesDiverged { .. })
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
