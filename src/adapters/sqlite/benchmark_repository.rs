//! SQLite implementation of the BenchmarkRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{format_datetime, parse_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BenchmarkSnapshot, HarnessRun};
use crate::domain::ports::BenchmarkRepository;

#[derive(Clone)]
pub struct SqliteBenchmarkRepository {
    pool: SqlitePool,
}

impl SqliteBenchmarkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BenchmarkRepository for SqliteBenchmarkRepository {
    async fn latest_snapshot(&self, store_id: &str) -> DomainResult<Option<BenchmarkSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"SELECT * FROM benchmark_snapshots WHERE store_id = ?
               ORDER BY created_at DESC, rowid DESC LIMIT 1"#,
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BenchmarkSnapshot::try_from).transpose()
    }

    async fn insert_snapshot(&self, snapshot: &BenchmarkSnapshot) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO benchmark_snapshots
                   (id, store_id, source, row_count, sample_size, dataset_hash, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(snapshot.id.to_string())
        .bind(&snapshot.store_id)
        .bind(&snapshot.source)
        .bind(i64::try_from(snapshot.row_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(snapshot.sample_size).unwrap_or(i64::MAX))
        .bind(&snapshot.dataset_hash)
        .bind(format_datetime(snapshot.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn qa_feedback_count(&self, store_id: &str) -> DomainResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM qa_feedback WHERE store_id = ?")
                .bind(store_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn record_qa_feedback(
        &self,
        store_id: &str,
        product_id: &str,
        verdict: &str,
    ) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO qa_feedback (store_id, product_id, verdict, created_at)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(store_id)
        .bind(product_id)
        .bind(verdict)
        .bind(format_datetime(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_harness_run(&self, run: &HarnessRun) -> DomainResult<()> {
        let result_json = serde_json::to_string(&run.result)?;

        sqlx::query(
            r#"INSERT INTO harness_runs (id, batch_id, candidate_run_id, baseline_run_id,
               snapshot_id, passed, result, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.batch_id.map(|id| id.to_string()))
        .bind(&run.result.candidate_run_id)
        .bind(&run.result.baseline_run_id)
        .bind(run.result.snapshot_id.map(|id| id.to_string()))
        .bind(run.result.passed)
        .bind(&result_json)
        .bind(format_datetime(run.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_harness_runs(&self, batch_id: Uuid) -> DomainResult<Vec<HarnessRun>> {
        let rows: Vec<HarnessRunRow> = sqlx::query_as(
            r#"SELECT id, batch_id, result, created_at FROM harness_runs
               WHERE batch_id = ? ORDER BY created_at ASC, rowid ASC"#,
        )
        .bind(batch_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HarnessRun::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    store_id: String,
    source: String,
    row_count: i64,
    sample_size: i64,
    dataset_hash: String,
    created_at: String,
}

impl TryFrom<SnapshotRow> for BenchmarkSnapshot {
    type Error = DomainError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let to_u64 =
            |v: i64| u64::try_from(v).map_err(|e| DomainError::SerializationError(e.to_string()));
        Ok(BenchmarkSnapshot {
            id: parse_uuid(&row.id)?,
            store_id: row.store_id,
            source: row.source,
            row_count: to_u64(row.row_count)?,
            sample_size: to_u64(row.sample_size)?,
            dataset_hash: row.dataset_hash,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HarnessRunRow {
    id: String,
    batch_id: Option<String>,
    result: String,
    created_at: String,
}

impl TryFrom<HarnessRunRow> for HarnessRun {
    type Error = DomainError;

    fn try_from(row: HarnessRunRow) -> Result<Self, Self::Error> {
        Ok(HarnessRun {
            id: parse_uuid(&row.id)?,
            batch_id: parse_optional_uuid(row.batch_id)?,
            result: serde_json::from_str(&row.result)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
