//! SQLite implementation of the RunAttemptRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{
    format_datetime, parse_optional_datetime, parse_optional_json, parse_uuid, to_optional_json,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AttemptStatus, RunAttempt};
use crate::domain::ports::RunAttemptRepository;

#[derive(Clone)]
pub struct SqliteRunAttemptRepository {
    pool: SqlitePool,
}

impl SqliteRunAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunAttemptRepository for SqliteRunAttemptRepository {
    async fn start(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
        attempt_no: u32,
    ) -> DomainResult<RunAttempt> {
        // Re-starting an interrupted attempt wipes whatever it had recorded.
        let row: RunAttemptRow = sqlx::query_as(
            r#"INSERT INTO self_improvement_run_attempts
               (batch_id, sequence_no, attempt_no, status, started_at)
               VALUES (?, ?, ?, 'running', ?)
               ON CONFLICT (batch_id, sequence_no, attempt_no) DO UPDATE SET
                   status = 'running',
                   pipeline_run_id = NULL,
                   error = NULL,
                   self_correction_context = NULL,
                   gate_result = NULL,
                   learning_result = NULL,
                   started_at = excluded.started_at,
                   finished_at = NULL
               RETURNING *"#,
        )
        .bind(batch_id.to_string())
        .bind(i64::from(sequence_no))
        .bind(i64::from(attempt_no))
        .bind(format_datetime(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn finalize(&self, attempt: &RunAttempt) -> DomainResult<()> {
        if !attempt.status.is_finished() {
            return Err(DomainError::InvalidStateTransition {
                from: AttemptStatus::Running.to_string(),
                to: attempt.status.to_string(),
                reason: "an attempt can only be finalized with a terminal status".to_string(),
            });
        }

        let context_json = to_optional_json(attempt.self_correction_context.as_ref())?;
        let gate_json = to_optional_json(attempt.gate_result.as_ref())?;
        let learning_json = to_optional_json(attempt.learning_result.as_ref())?;
        let finished_at = attempt.finished_at.unwrap_or_else(Utc::now);

        sqlx::query(
            r#"INSERT INTO self_improvement_run_attempts
               (batch_id, sequence_no, attempt_no, status, pipeline_run_id, error,
                self_correction_context, gate_result, learning_result, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (batch_id, sequence_no, attempt_no) DO UPDATE SET
                   status = excluded.status,
                   pipeline_run_id = excluded.pipeline_run_id,
                   error = excluded.error,
                   self_correction_context = excluded.self_correction_context,
                   gate_result = excluded.gate_result,
                   learning_result = excluded.learning_result,
                   started_at = COALESCE(
                       self_improvement_run_attempts.started_at,
                       excluded.started_at
                   ),
                   finished_at = excluded.finished_at"#,
        )
        .bind(attempt.batch_id.to_string())
        .bind(i64::from(attempt.sequence_no))
        .bind(i64::from(attempt.attempt_no))
        .bind(attempt.status.as_str())
        .bind(&attempt.pipeline_run_id)
        .bind(&attempt.error)
        .bind(&context_json)
        .bind(&gate_json)
        .bind(&learning_json)
        .bind(attempt.started_at.map(format_datetime))
        .bind(format_datetime(finished_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
        attempt_no: u32,
    ) -> DomainResult<Option<RunAttempt>> {
        let row: Option<RunAttemptRow> = sqlx::query_as(
            r#"SELECT * FROM self_improvement_run_attempts
               WHERE batch_id = ? AND sequence_no = ? AND attempt_no = ?"#,
        )
        .bind(batch_id.to_string())
        .bind(i64::from(sequence_no))
        .bind(i64::from(attempt_no))
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunAttempt::try_from).transpose()
    }

    async fn list_for_sequence(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
    ) -> DomainResult<Vec<RunAttempt>> {
        let rows: Vec<RunAttemptRow> = sqlx::query_as(
            r#"SELECT * FROM self_improvement_run_attempts
               WHERE batch_id = ? AND sequence_no = ?
               ORDER BY attempt_no ASC"#,
        )
        .bind(batch_id.to_string())
        .bind(i64::from(sequence_no))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunAttempt::try_from).collect()
    }

    async fn list_for_batch(&self, batch_id: Uuid) -> DomainResult<Vec<RunAttempt>> {
        let rows: Vec<RunAttemptRow> = sqlx::query_as(
            r#"SELECT * FROM self_improvement_run_attempts
               WHERE batch_id = ?
               ORDER BY sequence_no ASC, attempt_no ASC"#,
        )
        .bind(batch_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunAttempt::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct RunAttemptRow {
    batch_id: String,
    sequence_no: i64,
    attempt_no: i64,
    status: String,
    pipeline_run_id: Option<String>,
    error: Option<String>,
    self_correction_context: Option<String>,
    gate_result: Option<String>,
    learning_result: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl TryFrom<RunAttemptRow> for RunAttempt {
    type Error = DomainError;

    fn try_from(row: RunAttemptRow) -> Result<Self, Self::Error> {
        let status = AttemptStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid attempt status: {}", row.status))
        })?;
        let to_u32 =
            |v: i64| u32::try_from(v).map_err(|e| DomainError::SerializationError(e.to_string()));

        Ok(RunAttempt {
            batch_id: parse_uuid(&row.batch_id)?,
            sequence_no: to_u32(row.sequence_no)?,
            attempt_no: to_u32(row.attempt_no)?,
            status,
            pipeline_run_id: row.pipeline_run_id,
            error: row.error,
            self_correction_context: parse_optional_json(row.self_correction_context)?,
            gate_result: parse_optional_json(row.gate_result)?,
            learning_result: parse_optional_json(row.learning_result)?,
            started_at: parse_optional_datetime(row.started_at)?,
            finished_at: parse_optional_datetime(row.finished_at)?,
        })
    }
}
