use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Batch, BatchStatus, BatchSummary};

/// One attempt reclaimed by the stale sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredAttempt {
    pub batch_id: Uuid,
    pub sequence_no: u32,
    pub attempt_no: u32,
    /// `failed` or `retried_failed`, depending on the retry budget.
    pub new_status: String,
}

/// What a stale sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered_attempts: Vec<RecoveredAttempt>,
    pub requeued_batches: Vec<Uuid>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.recovered_attempts.is_empty() && self.requeued_batches.is_empty()
    }
}

/// Repository port for the batch queue.
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Insert a new queued batch
    async fn enqueue(&self, batch: &Batch) -> DomainResult<()>;

    /// Get a batch by ID
    async fn get(&self, id: Uuid) -> DomainResult<Option<Batch>>;

    /// List batches, newest first
    async fn list(&self, limit: usize) -> DomainResult<Vec<Batch>>;

    /// Atomically flip the oldest queued batch to running and return it.
    ///
    /// Two concurrent callers never receive the same batch. Returns `None`
    /// when nothing is queued.
    async fn claim_next_queued(&self) -> DomainResult<Option<Batch>>;

    /// Persist the running summary of a batch
    async fn update_summary(&self, id: Uuid, summary: &BatchSummary) -> DomainResult<()>;

    /// Write a terminal status, the final summary and `finished_at`
    async fn finalize(
        &self,
        id: Uuid,
        status: BatchStatus,
        summary: &BatchSummary,
    ) -> DomainResult<()>;

    /// Record an out-of-band cancellation request.
    ///
    /// Queued and running batches become `cancelled`; a running batch stops
    /// before its next sequence.
    async fn request_cancel(&self, id: Uuid) -> DomainResult<Batch>;

    /// Fail attempts stuck in `running` longer than `stale_after` and requeue
    /// their batches when nothing else is running.
    async fn recover_stale(&self, stale_after: Duration) -> DomainResult<RecoveryReport>;
}
