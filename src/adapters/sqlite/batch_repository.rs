//! SQLite implementation of the BatchRepository.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{format_datetime, parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AutoApplyPolicy, Batch, BatchStatus, BatchSummary, LoopType};
use crate::domain::ports::{BatchRepository, RecoveredAttempt, RecoveryReport};

const STALE_ATTEMPT_ERROR: &str =
    "attempt exceeded the stale window without finishing; worker presumed dead";

#[derive(Clone)]
pub struct SqliteBatchRepository {
    pool: SqlitePool,
}

impl SqliteBatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchRepository for SqliteBatchRepository {
    async fn enqueue(&self, batch: &Batch) -> DomainResult<()> {
        let summary_json = serde_json::to_string(&batch.summary)?;

        sqlx::query(
            r#"INSERT INTO self_improvement_batches (id, requested_count, loop_type, status,
               max_loops_cap, retry_limit, auto_apply_policy, summary, created_at, started_at,
               finished_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(batch.id.to_string())
        .bind(i64::from(batch.requested_count))
        .bind(batch.loop_type.as_str())
        .bind(batch.status.as_str())
        .bind(i64::from(batch.max_loops_cap))
        .bind(i64::from(batch.retry_limit))
        .bind(batch.auto_apply_policy.as_str())
        .bind(&summary_json)
        .bind(format_datetime(batch.created_at))
        .bind(batch.started_at.map(format_datetime))
        .bind(batch.finished_at.map(format_datetime))
        .bind(format_datetime(batch.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Batch>> {
        let row: Option<BatchRow> =
            sqlx::query_as("SELECT * FROM self_improvement_batches WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Batch::try_from).transpose()
    }

    async fn list(&self, limit: usize) -> DomainResult<Vec<Batch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(
            "SELECT * FROM self_improvement_batches ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Batch::try_from).collect()
    }

    async fn claim_next_queued(&self) -> DomainResult<Option<Batch>> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        // The UPDATE takes SQLite's write lock before reading, and the
        // repeated status guard means a row already flipped by another
        // worker yields no row here.
        let row: Option<BatchRow> = sqlx::query_as(
            r#"UPDATE self_improvement_batches
               SET status = 'running', started_at = COALESCE(started_at, ?),
                   finished_at = NULL, updated_at = ?
               WHERE id = (
                   SELECT id FROM self_improvement_batches
                   WHERE status = 'queued'
                   ORDER BY created_at ASC, rowid ASC
                   LIMIT 1
               )
               AND status = 'queued'
               RETURNING *"#,
        )
        .bind(&now)
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        row.map(Batch::try_from).transpose()
    }

    async fn update_summary(&self, id: Uuid, summary: &BatchSummary) -> DomainResult<()> {
        let summary_json = serde_json::to_string(summary)?;

        let result = sqlx::query(
            "UPDATE self_improvement_batches SET summary = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&summary_json)
        .bind(format_datetime(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::BatchNotFound(id));
        }
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: BatchStatus,
        summary: &BatchSummary,
    ) -> DomainResult<()> {
        if !status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: BatchStatus::Running.to_string(),
                to: status.to_string(),
                reason: "finalize requires a terminal status".to_string(),
            });
        }

        let summary_json = serde_json::to_string(summary)?;
        let now = format_datetime(Utc::now());

        let result = sqlx::query(
            r#"UPDATE self_improvement_batches
               SET status = ?, summary = ?, finished_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(&summary_json)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::BatchNotFound(id));
        }
        Ok(())
    }

    async fn request_cancel(&self, id: Uuid) -> DomainResult<Batch> {
        let now = format_datetime(Utc::now());

        let row: Option<BatchRow> = sqlx::query_as(
            r#"UPDATE self_improvement_batches
               SET status = 'cancelled', finished_at = COALESCE(finished_at, ?), updated_at = ?
               WHERE id = ? AND status IN ('queued', 'running')
               RETURNING *"#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Batch::try_from(row);
        }

        match self.get(id).await? {
            None => Err(DomainError::BatchNotFound(id)),
            Some(batch) => Err(DomainError::InvalidStateTransition {
                from: batch.status.to_string(),
                to: BatchStatus::Cancelled.to_string(),
                reason: "batch already finished".to_string(),
            }),
        }
    }

    async fn recover_stale(&self, stale_after: Duration) -> DomainResult<RecoveryReport> {
        let now = Utc::now();
        let now_str = format_datetime(now);
        let cutoff = format_datetime(now - stale_after);
        let mut tx = self.pool.begin().await?;

        let stale: Vec<(String, i64, i64, String)> = sqlx::query_as(
            r#"UPDATE self_improvement_run_attempts
               SET status = CASE
                       WHEN attempt_no > (
                           SELECT b.retry_limit FROM self_improvement_batches b
                           WHERE b.id = self_improvement_run_attempts.batch_id
                       ) THEN 'retried_failed'
                       ELSE 'failed'
                   END,
                   error = ?,
                   finished_at = ?
               WHERE status = 'running' AND (started_at IS NULL OR started_at < ?)
               RETURNING batch_id, sequence_no, attempt_no, status"#,
        )
        .bind(STALE_ATTEMPT_ERROR)
        .bind(&now_str)
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut report = RecoveryReport::default();
        let mut candidates: Vec<(String, &'static str)> = Vec::new();

        for (batch_id, sequence_no, attempt_no, new_status) in stale {
            let batch_uuid = parse_uuid(&batch_id)?;
            report.recovered_attempts.push(RecoveredAttempt {
                batch_id: batch_uuid,
                sequence_no: u32::try_from(sequence_no).unwrap_or_default(),
                attempt_no: u32::try_from(attempt_no).unwrap_or_default(),
                new_status,
            });
            if !candidates.iter().any(|(id, _)| *id == batch_id) {
                candidates.push((batch_id, "stale_attempt_recovered"));
            }
        }

        // Batches whose worker died between attempts have nothing running.
        let idle: Vec<(String,)> = sqlx::query_as(
            r#"SELECT id FROM self_improvement_batches b
               WHERE b.status = 'running' AND b.updated_at < ?
               AND NOT EXISTS (
                   SELECT 1 FROM self_improvement_run_attempts a
                   WHERE a.batch_id = b.id AND a.status = 'running'
               )"#,
        )
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await?;

        for (batch_id,) in idle {
            if !candidates.iter().any(|(id, _)| *id == batch_id) {
                candidates.push((batch_id, "stale_batch_without_running_attempt"));
            }
        }

        for (batch_id, reason) in candidates {
            let row: Option<(String, String)> = sqlx::query_as(
                r#"SELECT status, summary FROM self_improvement_batches b
                   WHERE b.id = ? AND NOT EXISTS (
                       SELECT 1 FROM self_improvement_run_attempts a
                       WHERE a.batch_id = b.id AND a.status = 'running'
                   )"#,
            )
            .bind(&batch_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((status, summary_json)) = row else { continue };
            if status != BatchStatus::Running.as_str() {
                continue;
            }

            let mut summary: BatchSummary = serde_json::from_str(&summary_json)?;
            summary.running_sequence = None;
            summary.recovery_reason = Some(reason.to_string());

            sqlx::query(
                r#"UPDATE self_improvement_batches
                   SET status = 'queued', summary = ?, updated_at = ?
                   WHERE id = ? AND status = 'running'"#,
            )
            .bind(serde_json::to_string(&summary)?)
            .bind(&now_str)
            .bind(&batch_id)
            .execute(&mut *tx)
            .await?;

            report.requeued_batches.push(parse_uuid(&batch_id)?);
        }

        tx.commit().await?;

        if !report.is_empty() {
            tracing::warn!(
                attempts = report.recovered_attempts.len(),
                batches = report.requeued_batches.len(),
                "recovered stale self-improvement work"
            );
        }
        Ok(report)
    }
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: String,
    requested_count: i64,
    loop_type: String,
    status: String,
    max_loops_cap: i64,
    retry_limit: i64,
    auto_apply_policy: String,
    summary: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    updated_at: String,
}

impl TryFrom<BatchRow> for Batch {
    type Error = DomainError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        let invalid = |what: &str, value: &str| {
            DomainError::SerializationError(format!("Invalid {what}: {value}"))
        };
        let loop_type = LoopType::from_str(&row.loop_type)
            .ok_or_else(|| invalid("loop type", &row.loop_type))?;
        let status =
            BatchStatus::from_str(&row.status).ok_or_else(|| invalid("batch status", &row.status))?;
        let auto_apply_policy = AutoApplyPolicy::from_str(&row.auto_apply_policy)
            .ok_or_else(|| invalid("auto-apply policy", &row.auto_apply_policy))?;
        let to_u32 =
            |v: i64| u32::try_from(v).map_err(|e| DomainError::SerializationError(e.to_string()));

        Ok(Batch {
            id: parse_uuid(&row.id)?,
            requested_count: to_u32(row.requested_count)?,
            loop_type,
            status,
            max_loops_cap: to_u32(row.max_loops_cap)?,
            retry_limit: to_u32(row.retry_limit)?,
            auto_apply_policy,
            summary: serde_json::from_str(&row.summary)?,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            finished_at: parse_optional_datetime(row.finished_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteRunAttemptRepository};
    use crate::domain::ports::RunAttemptRepository;

    async fn setup() -> (SqlitePool, SqliteBatchRepository) {
        let pool = create_migrated_test_pool().await.unwrap();
        (pool.clone(), SqliteBatchRepository::new(pool))
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let (_, repo) = setup().await;
        let batch = Batch::new(3, LoopType::Canary).with_retry_limit(2);
        repo.enqueue(&batch).await.unwrap();

        let loaded = repo.get(batch.id).await.unwrap().unwrap();
        assert_eq!(loaded.requested_count, 3);
        assert_eq!(loaded.loop_type, LoopType::Canary);
        assert_eq!(loaded.retry_limit, 2);
        assert_eq!(loaded.status, BatchStatus::Queued);
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_exclusive() {
        let (_, repo) = setup().await;
        let first = Batch::new(1, LoopType::Full);
        let mut second = Batch::new(1, LoopType::Full);
        second.created_at = first.created_at + Duration::seconds(1);
        repo.enqueue(&second).await.unwrap();
        repo.enqueue(&first).await.unwrap();

        let claimed = repo.claim_next_queued().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, BatchStatus::Running);
        assert!(claimed.started_at.is_some());

        let claimed = repo.claim_next_queued().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(repo.claim_next_queued().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_cancel() {
        let (_, repo) = setup().await;
        let batch = Batch::new(2, LoopType::Full);
        repo.enqueue(&batch).await.unwrap();

        let cancelled = repo.request_cancel(batch.id).await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        let err = repo.request_cancel(batch.id).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        let err = repo.request_cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DomainError::BatchNotFound(_)));
    }

    #[tokio::test]
    async fn test_finalize_rejects_non_terminal_status() {
        let (_, repo) = setup().await;
        let batch = Batch::new(1, LoopType::Full);
        repo.enqueue(&batch).await.unwrap();

        let err = repo
            .finalize(batch.id, BatchStatus::Running, &BatchSummary::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));

        let summary = BatchSummary { completed_loops: 1, ..BatchSummary::default() };
        repo.finalize(batch.id, BatchStatus::Completed, &summary).await.unwrap();
        let loaded = repo.get(batch.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert_eq!(loaded.summary.completed_loops, 1);
        assert!(loaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_recover_stale_fails_attempt_and_requeues_batch() {
        let (pool, repo) = setup().await;
        let attempts = SqliteRunAttemptRepository::new(pool.clone());
        let batch = Batch::new(2, LoopType::Canary).with_retry_limit(1);
        repo.enqueue(&batch).await.unwrap();
        repo.claim_next_queued().await.unwrap().unwrap();

        attempts.start(batch.id, 1, 1).await.unwrap();
        attempts.start(batch.id, 2, 2).await.unwrap();
        let old = format_datetime(Utc::now() - Duration::hours(3));
        sqlx::query("UPDATE self_improvement_run_attempts SET started_at = ?")
            .bind(&old)
            .execute(&pool)
            .await
            .unwrap();

        let report = repo.recover_stale(Duration::minutes(90)).await.unwrap();
        assert_eq!(report.recovered_attempts.len(), 2);
        assert_eq!(report.requeued_batches, vec![batch.id]);

        let first = attempts.get(batch.id, 1, 1).await.unwrap().unwrap();
        assert_eq!(first.status.as_str(), "failed");
        assert!(first.error.is_some());
        let second = attempts.get(batch.id, 2, 2).await.unwrap().unwrap();
        assert_eq!(second.status.as_str(), "retried_failed");

        let loaded = repo.get(batch.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Queued);
        assert_eq!(loaded.summary.recovery_reason.as_deref(), Some("stale_attempt_recovered"));

        assert!(repo.recover_stale(Duration::minutes(90)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_stale_leaves_fresh_attempts_alone() {
        let (pool, repo) = setup().await;
        let attempts = SqliteRunAttemptRepository::new(pool);
        let batch = Batch::new(1, LoopType::Full);
        repo.enqueue(&batch).await.unwrap();
        repo.claim_next_queued().await.unwrap().unwrap();
        attempts.start(batch.id, 1, 1).await.unwrap();

        let report = repo.recover_stale(Duration::minutes(90)).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(repo.get(batch.id).await.unwrap().unwrap().status, BatchStatus::Running);
    }

    #[tokio::test]
    async fn test_recover_stale_requeues_idle_running_batch() {
        let (pool, repo) = setup().await;
        let batch = Batch::new(1, LoopType::Full);
        repo.enqueue(&batch).await.unwrap();
        repo.claim_next_queued().await.unwrap().unwrap();
        sqlx::query("UPDATE self_improvement_batches SET updated_at = ?")
            .bind(format_datetime(Utc::now() - Duration::hours(2)))
            .execute(&pool)
            .await
            .unwrap();

        let report = repo.recover_stale(Duration::minutes(90)).await.unwrap();
        assert!(report.recovered_attempts.is_empty());
        assert_eq!(report.requeued_batches, vec![batch.id]);
        let loaded = repo.get(batch.id).await.unwrap().unwrap();
        assert_eq!(
            loaded.summary.recovery_reason.as_deref(),
            Some("stale_batch_without_running_attempt")
        );
    }
}
