use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::RunAttempt;

/// Repository port for run attempts.
///
/// Both writes are upserts on `(batch_id, sequence_no, attempt_no)`, so
/// replaying them after a crash is harmless.
#[async_trait]
pub trait RunAttemptRepository: Send + Sync {
    /// Mark an attempt running, creating it if needed
    async fn start(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
        attempt_no: u32,
    ) -> DomainResult<RunAttempt>;

    /// Record the terminal state of an attempt
    async fn finalize(&self, attempt: &RunAttempt) -> DomainResult<()>;

    async fn get(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
        attempt_no: u32,
    ) -> DomainResult<Option<RunAttempt>>;

    /// Attempts of one sequence ordered by attempt number
    async fn list_for_sequence(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
    ) -> DomainResult<Vec<RunAttempt>>;

    /// Attempts of a batch ordered by sequence then attempt number
    async fn list_for_batch(&self, batch_id: Uuid) -> DomainResult<Vec<RunAttempt>>;
}
