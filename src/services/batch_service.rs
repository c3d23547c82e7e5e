//! Queue-facing operations: enqueue, status, cancel, recovery.

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AutoApplyPolicy, Batch, BatchConfig, Intent, LoopType, RunAttempt};
use crate::domain::ports::{BatchRepository, RecoveryReport, RunAttemptRepository};

/// A batch with its attempts, for detail views.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub batch: Batch,
    pub attempts: Vec<RunAttempt>,
}

/// Result of handling a typed intent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentResponse {
    Enqueued { batch: Batch },
    Batches { batches: Vec<Batch> },
    Batch { detail: BatchDetail },
}

/// Options for a new batch beyond its count and loop type.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub retry_limit: Option<u32>,
    pub auto_apply_policy: Option<AutoApplyPolicy>,
}

pub struct BatchService {
    batches: Arc<dyn BatchRepository>,
    attempts: Arc<dyn RunAttemptRepository>,
    config: BatchConfig,
}

impl BatchService {
    pub fn new(
        batches: Arc<dyn BatchRepository>,
        attempts: Arc<dyn RunAttemptRepository>,
        config: BatchConfig,
    ) -> Self {
        Self { batches, attempts, config }
    }

    pub fn max_requested_count(&self) -> u32 {
        self.config.max_requested_count
    }

    #[instrument(skip(self, options), err)]
    pub async fn enqueue(
        &self,
        count: u32,
        loop_type: LoopType,
        options: EnqueueOptions,
    ) -> DomainResult<Batch> {
        let batch = Batch::new(count, loop_type)
            .with_retry_limit(options.retry_limit.unwrap_or(self.config.default_retry_limit))
            .with_max_loops_cap(self.config.max_loops_cap)
            .with_auto_apply_policy(options.auto_apply_policy.unwrap_or_default());

        batch.validate(self.config.max_requested_count).map_err(DomainError::ValidationFailed)?;
        self.batches.enqueue(&batch).await?;

        tracing::info!(batch_id = %batch.id, count, loop_type = %loop_type, "batch enqueued");
        Ok(batch)
    }

    pub async fn status_all(&self, limit: usize) -> DomainResult<Vec<Batch>> {
        self.batches.list(limit).await
    }

    pub async fn status_one(&self, id: Uuid) -> DomainResult<BatchDetail> {
        let batch = self.batches.get(id).await?.ok_or(DomainError::BatchNotFound(id))?;
        let attempts = self.attempts.list_for_batch(id).await?;
        Ok(BatchDetail { batch, attempts })
    }

    #[instrument(skip(self), err)]
    pub async fn cancel(&self, id: Uuid) -> DomainResult<Batch> {
        let batch = self.batches.request_cancel(id).await?;
        tracing::info!(batch_id = %id, "batch cancelled");
        Ok(batch)
    }

    /// One stale sweep with the configured window.
    pub async fn recover(&self) -> DomainResult<RecoveryReport> {
        self.batches.recover_stale(Duration::minutes(self.config.stale_after_minutes)).await
    }

    pub async fn handle_intent(&self, intent: Intent) -> DomainResult<IntentResponse> {
        match intent {
            Intent::Enqueue { count, loop_type } => {
                let batch = self.enqueue(count, loop_type, EnqueueOptions::default()).await?;
                Ok(IntentResponse::Enqueued { batch })
            }
            Intent::StatusAll => Ok(IntentResponse::Batches {
                batches: self.status_all(50).await?,
            }),
            Intent::StatusOne { batch_id } => Ok(IntentResponse::Batch {
                detail: self.status_one(batch_id).await?,
            }),
        }
    }
}
