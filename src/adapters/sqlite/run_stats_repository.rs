//! SQLite implementation of the RunStatsRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::PathBuf;

use crate::adapters::sqlite::{format_datetime, parse_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CanaryState, PipelineRunRecord, PipelineRunStatus, RunStats};
use crate::domain::ports::RunStatsRepository;

#[derive(Clone)]
pub struct SqliteRunStatsRepository {
    pool: SqlitePool,
}

impl SqliteRunStatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStatsRepository for SqliteRunStatsRepository {
    async fn record_run(&self, run: &PipelineRunRecord) -> DomainResult<()> {
        let stats_json = serde_json::to_string(&run.stats)?;
        let artifacts_json = serde_json::to_string(&run.artifacts)?;

        sqlx::query(
            r#"INSERT INTO pipeline_runs
                   (run_id, store_id, run_label, status, stats, artifacts, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (run_id) DO UPDATE SET
                   status = excluded.status,
                   stats = excluded.stats,
                   artifacts = excluded.artifacts"#,
        )
        .bind(&run.run_id)
        .bind(&run.store_id)
        .bind(&run.run_label)
        .bind(run.status.as_str())
        .bind(&stats_json)
        .bind(&artifacts_json)
        .bind(format_datetime(run.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> DomainResult<Option<PipelineRunRecord>> {
        let row: Option<PipelineRunRow> =
            sqlx::query_as("SELECT * FROM pipeline_runs WHERE run_id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(PipelineRunRecord::try_from).transpose()
    }

    async fn get_stats(&self, run_id: &str) -> DomainResult<RunStats> {
        self.get_run(run_id)
            .await?
            .map(|run| run.stats)
            .ok_or_else(|| DomainError::PipelineRunNotFound(run_id.to_string()))
    }

    async fn find_baseline(
        &self,
        store_id: &str,
        exclude_run_id: &str,
    ) -> DomainResult<Option<PipelineRunRecord>> {
        let row: Option<PipelineRunRow> = sqlx::query_as(
            r#"SELECT * FROM pipeline_runs
               WHERE store_id = ? AND run_id != ? AND status != 'failed'
               ORDER BY created_at DESC, rowid DESC
               LIMIT 1"#,
        )
        .bind(store_id)
        .bind(exclude_run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PipelineRunRecord::try_from).transpose()
    }

    async fn recent_runs(
        &self,
        store_id: &str,
        limit: u32,
    ) -> DomainResult<Vec<PipelineRunRecord>> {
        let rows: Vec<PipelineRunRow> = sqlx::query_as(
            r#"SELECT * FROM pipeline_runs WHERE store_id = ?
               ORDER BY created_at DESC, rowid DESC LIMIT ?"#,
        )
        .bind(store_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRunRecord::try_from).collect()
    }

    async fn get_canary_state(&self, store_id: &str) -> DomainResult<Option<CanaryState>> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            r#"SELECT store_id, run_id, hotlist_path, updated_at
               FROM canary_state WHERE store_id = ?"#,
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(store_id, run_id, hotlist_path, updated_at)| {
            Ok(CanaryState {
                store_id,
                run_id,
                hotlist_path: PathBuf::from(hotlist_path),
                updated_at: parse_datetime(&updated_at)?,
            })
        })
        .transpose()
    }

    async fn set_canary_state(&self, state: &CanaryState) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO canary_state (store_id, run_id, hotlist_path, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (store_id) DO UPDATE SET
                   run_id = excluded.run_id,
                   hotlist_path = excluded.hotlist_path,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&state.store_id)
        .bind(&state.run_id)
        .bind(state.hotlist_path.to_string_lossy().into_owned())
        .bind(format_datetime(state.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct PipelineRunRow {
    run_id: String,
    store_id: String,
    run_label: String,
    status: String,
    stats: String,
    artifacts: String,
    created_at: String,
}

impl TryFrom<PipelineRunRow> for PipelineRunRecord {
    type Error = DomainError;

    fn try_from(row: PipelineRunRow) -> Result<Self, Self::Error> {
        let status = PipelineRunStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid run status: {}", row.status))
        })?;

        Ok(PipelineRunRecord {
            run_id: row.run_id,
            store_id: row.store_id,
            run_label: row.run_label,
            status,
            stats: serde_json::from_str(&row.stats)?,
            artifacts: serde_json::from_str(&row.artifacts)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::{Duration, Utc};

    fn record(run_id: &str, status: PipelineRunStatus, offset_secs: i64) -> PipelineRunRecord {
        PipelineRunRecord {
            run_id: run_id.to_string(),
            store_id: "shop".to_string(),
            run_label: "canary".to_string(),
            status,
            stats: RunStats { auto_accepted_rate: 0.7, ..RunStats::default() },
            artifacts: Vec::new(),
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn test_get_stats_missing_run() {
        let repo = SqliteRunStatsRepository::new(create_migrated_test_pool().await.unwrap());
        let err = repo.get_stats("nope").await.unwrap_err();
        assert!(matches!(err, DomainError::PipelineRunNotFound(_)));
    }

    #[tokio::test]
    async fn test_find_baseline_skips_candidate_and_failed_runs() {
        let repo = SqliteRunStatsRepository::new(create_migrated_test_pool().await.unwrap());
        repo.record_run(&record("run-1", PipelineRunStatus::Completed, 0)).await.unwrap();
        repo.record_run(&record("run-2", PipelineRunStatus::Failed, 1)).await.unwrap();
        repo.record_run(&record("run-3", PipelineRunStatus::Completed, 2)).await.unwrap();

        let baseline = repo.find_baseline("shop", "run-3").await.unwrap().unwrap();
        assert_eq!(baseline.run_id, "run-1");
        assert!(repo.find_baseline("other", "run-3").await.unwrap().is_none());

        let recent = repo.recent_runs("shop", 2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["run-3", "run-2"]);
        let stats = repo.get_stats("run-1").await.unwrap();
        assert!((stats.auto_accepted_rate - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_canary_state_upsert() {
        let repo = SqliteRunStatsRepository::new(create_migrated_test_pool().await.unwrap());
        assert!(repo.get_canary_state("shop").await.unwrap().is_none());

        for run_id in ["run-1", "run-2"] {
            repo.set_canary_state(&CanaryState {
                store_id: "shop".to_string(),
                run_id: run_id.to_string(),
                hotlist_path: PathBuf::from(format!("/tmp/{run_id}/hotlist.csv")),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let state = repo.get_canary_state("shop").await.unwrap().unwrap();
        assert_eq!(state.run_id, "run-2");
        assert_eq!(state.hotlist_path, PathBuf::from("/tmp/run-2/hotlist.csv"));
    }
}
