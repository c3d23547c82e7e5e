//! Batch orchestration.
//!
//! The orchestrator claims a queued batch and walks its sequences in order.
//! Each sequence is planned from persisted attempts, so a batch requeued
//! after a crash picks up where it stopped without re-running finished work.

mod resume;
mod summary;
mod worker;

pub use resume::{decide_attempt_status, plan_sequence, SequencePlan};
pub use summary::SummaryAccumulator;
pub use worker::{BatchWorker, WorkerHandle, WorkerReport, WorkerSettings};

use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AttemptStatus, Batch, BatchStatus, LoopType, RunAttempt, SelfCorrectionContext, WorkerFailure,
};
use crate::domain::ports::{BatchRepository, RunAttemptRepository};
use crate::services::attempt_executor::AttemptRunner;

pub struct Orchestrator {
    batches: Arc<dyn BatchRepository>,
    attempts: Arc<dyn RunAttemptRepository>,
    runner: Arc<dyn AttemptRunner>,
}

impl Orchestrator {
    pub fn new(
        batches: Arc<dyn BatchRepository>,
        attempts: Arc<dyn RunAttemptRepository>,
        runner: Arc<dyn AttemptRunner>,
    ) -> Self {
        Self {
            batches,
            attempts,
            runner,
        }
    }

    /// Claim the oldest queued batch and run it to a terminal status.
    ///
    /// Returns `None` when the queue is empty. Errors after the claim do not
    /// propagate: the batch is finalized as `failed` with a worker failure.
    pub async fn process_next_batch(&self) -> DomainResult<Option<Batch>> {
        let Some(batch) = self.batches.claim_next_queued().await? else {
            return Ok(None);
        };
        tracing::info!(
            batch_id = %batch.id,
            loop_type = %batch.loop_type,
            requested = batch.requested_count,
            "claimed batch"
        );

        match self.run_batch(&batch).await {
            Ok(finished) => Ok(Some(finished)),
            Err(e) => {
                tracing::error!(batch_id = %batch.id, error = %e, "batch aborted");
                let attempts = self
                    .attempts
                    .list_for_batch(batch.id)
                    .await
                    .unwrap_or_default();
                let mut acc =
                    SummaryAccumulator::rebuild(&batch.summary, &attempts, batch.retry_limit);
                acc.set_worker_failure(WorkerFailure {
                    message: e.to_string(),
                    failed_at: Utc::now(),
                });
                self.batches
                    .finalize(batch.id, BatchStatus::Failed, acc.summary())
                    .await?;
                self.reload(&batch).await.map(Some)
            }
        }
    }

    async fn reload(&self, batch: &Batch) -> DomainResult<Batch> {
        self.batches
            .get(batch.id)
            .await?
            .ok_or(DomainError::BatchNotFound(batch.id))
    }

    /// Run every pending sequence of a claimed batch and finalize it.
    #[instrument(skip(self, batch), fields(batch_id = %batch.id), err)]
    pub async fn run_batch(&self, batch: &Batch) -> DomainResult<Batch> {
        let attempts = self.attempts.list_for_batch(batch.id).await?;
        let mut acc = SummaryAccumulator::rebuild(&batch.summary, &attempts, batch.retry_limit);
        self.batches.update_summary(batch.id, acc.summary()).await?;

        for sequence_no in 1..=batch.requested_count {
            if self.reload(batch).await?.status == BatchStatus::Cancelled {
                tracing::info!(batch_id = %batch.id, sequence_no, "batch cancelled");
                acc.set_running_sequence(None);
                self.batches
                    .finalize(batch.id, BatchStatus::Cancelled, acc.summary())
                    .await?;
                return self.reload(batch).await;
            }

            let existing = self
                .attempts
                .list_for_sequence(batch.id, sequence_no)
                .await?;
            let plan = plan_sequence(&existing, batch.retry_limit);
            let (mut attempt_no, mut carried) = match plan {
                SequencePlan::Complete { .. } => {
                    tracing::debug!(sequence_no, "sequence already complete");
                    continue;
                }
                SequencePlan::Run { attempt_no, carried } => (attempt_no, carried),
            };

            acc.set_running_sequence(Some(sequence_no));
            self.batches.update_summary(batch.id, acc.summary()).await?;

            loop {
                let attempt = self
                    .run_attempt(batch, sequence_no, attempt_no, carried.take())
                    .await?;
                acc.record_attempt(&attempt.record);
                if attempt.continue_sequence {
                    attempt_no += 1;
                    carried = attempt.record.self_correction_context;
                    continue;
                }
                acc.record_sequence(attempt.record.status);
                break;
            }

            acc.set_running_sequence(None);
            self.batches.update_summary(batch.id, acc.summary()).await?;
        }

        if self.reload(batch).await?.status == BatchStatus::Cancelled {
            self.batches
                .finalize(batch.id, BatchStatus::Cancelled, acc.summary())
                .await?;
            return self.reload(batch).await;
        }

        let status = if acc.summary().final_failed_count > 0 {
            BatchStatus::CompletedWithFailures
        } else {
            BatchStatus::Completed
        };
        self.batches.finalize(batch.id, status, acc.summary()).await?;
        tracing::info!(
            batch_id = %batch.id,
            status = %status,
            succeeded = acc.summary().success_count + acc.summary().retried_success_count,
            failed = acc.summary().final_failed_count,
            "batch finished"
        );
        self.reload(batch).await
    }

    async fn run_attempt(
        &self,
        batch: &Batch,
        sequence_no: u32,
        attempt_no: u32,
        carried: Option<SelfCorrectionContext>,
    ) -> DomainResult<FinishedAttempt> {
        let mut record = self.attempts.start(batch.id, sequence_no, attempt_no).await?;

        let result = self
            .runner
            .execute(batch, sequence_no, attempt_no, carried.as_ref())
            .await;
        let (status, continue_sequence) = match result {
            Ok(outcome) => {
                let decision = decide_attempt_status(
                    outcome.passed,
                    outcome.retryable_failure,
                    attempt_no,
                    batch.retry_limit,
                );
                record.pipeline_run_id = Some(outcome.run_id);
                record.error = outcome.error;
                record.gate_result = Some(outcome.quality_gate);
                record.learning_result = Some(outcome.learning_result);
                record.self_correction_context = outcome.correction_context;
                decision
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(
                    batch_id = %batch.id,
                    sequence_no,
                    attempt_no,
                    error = %e,
                    "attempt aborted"
                );
                record.error = Some(e.to_string());
                record.status = AttemptStatus::Failed;
                record.finished_at = Some(Utc::now());
                self.attempts.finalize(&record).await?;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    batch_id = %batch.id,
                    sequence_no,
                    attempt_no,
                    error = %e,
                    "attempt failed"
                );
                let carried_metrics = carried.map(|c| c.failed_metrics).unwrap_or_default();
                let mut context =
                    SelfCorrectionContext::from_error(e.to_string(), &carried_metrics);
                context.degrade_mode = batch.loop_type == LoopType::Canary && attempt_no > 1;
                record.error = Some(e.to_string());
                record.self_correction_context = Some(context);
                decide_attempt_status(false, true, attempt_no, batch.retry_limit)
            }
        };

        record.status = status;
        record.finished_at = Some(Utc::now());
        self.attempts.finalize(&record).await?;
        tracing::info!(
            batch_id = %batch.id,
            sequence_no,
            attempt_no,
            status = %status,
            "attempt finalized"
        );

        Ok(FinishedAttempt {
            record,
            continue_sequence,
        })
    }
}

struct FinishedAttempt {
    record: RunAttempt,
    continue_sequence: bool,
}
