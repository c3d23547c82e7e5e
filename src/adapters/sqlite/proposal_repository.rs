//! SQLite implementation of the ProposalRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{format_datetime, parse_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Proposal, ProposalKind, ProposalStatus};
use crate::domain::ports::{ProposalFilter, ProposalRepository};

#[derive(Clone)]
pub struct SqliteProposalRepository {
    pool: SqlitePool,
}

impl SqliteProposalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProposalRepository for SqliteProposalRepository {
    async fn insert(&self, proposal: &Proposal) -> DomainResult<()> {
        let payload_json = serde_json::to_string(&proposal.payload)?;

        sqlx::query(
            r#"INSERT INTO rule_proposals (id, batch_id, run_id, kind, status, confidence_score,
               expected_impact_score, payload, source, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(proposal.id.to_string())
        .bind(proposal.batch_id.map(|id| id.to_string()))
        .bind(&proposal.run_id)
        .bind(proposal.kind.as_str())
        .bind(proposal.status.as_str())
        .bind(proposal.confidence_score)
        .bind(proposal.expected_impact_score)
        .bind(&payload_json)
        .bind(&proposal.source)
        .bind(format_datetime(proposal.created_at))
        .bind(format_datetime(proposal.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Proposal>> {
        let row: Option<ProposalRow> = sqlx::query_as("SELECT * FROM rule_proposals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Proposal::try_from).transpose()
    }

    async fn list(&self, filter: ProposalFilter) -> DomainResult<Vec<Proposal>> {
        let mut query = String::from("SELECT * FROM rule_proposals WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(batch_id) = &filter.batch_id {
            query.push_str(" AND batch_id = ?");
            bindings.push(batch_id.to_string());
        }
        if let Some(run_id) = &filter.run_id {
            query.push_str(" AND run_id = ?");
            bindings.push(run_id.clone());
        }
        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }

        query.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let mut q = sqlx::query_as::<_, ProposalRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<ProposalRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Proposal::try_from).collect()
    }

    async fn update_status(&self, id: Uuid, status: ProposalStatus) -> DomainResult<()> {
        let result =
            sqlx::query("UPDATE rule_proposals SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(format_datetime(Utc::now()))
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ProposalNotFound(id));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ProposalRow {
    id: String,
    batch_id: Option<String>,
    run_id: Option<String>,
    kind: String,
    status: String,
    confidence_score: f64,
    expected_impact_score: f64,
    payload: String,
    source: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ProposalRow> for Proposal {
    type Error = DomainError;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        let kind = ProposalKind::from_str(&row.kind).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid proposal kind: {}", row.kind))
        })?;
        let status = ProposalStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid proposal status: {}", row.status))
        })?;

        Ok(Proposal {
            id: parse_uuid(&row.id)?,
            batch_id: parse_optional_uuid(row.batch_id)?,
            run_id: row.run_id,
            kind,
            status,
            confidence_score: row.confidence_score,
            expected_impact_score: row.expected_impact_score,
            payload: serde_json::from_str(&row.payload)?,
            source: row.source,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
