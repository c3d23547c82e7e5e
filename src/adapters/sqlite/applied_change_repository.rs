//! SQLite implementation of the AppliedChangeRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{format_datetime, parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AppliedChange, AppliedChangeStatus, ProposalKind, ProposalStatus, RollbackEvent, RollbackScope,
    RuleDiff,
};
use crate::domain::ports::AppliedChangeRepository;

#[derive(Clone)]
pub struct SqliteAppliedChangeRepository {
    pool: SqlitePool,
}

impl SqliteAppliedChangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn proposal_status(&self, id: Uuid) -> DomainResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM rule_proposals WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(s,)| s))
    }
}

#[async_trait]
impl AppliedChangeRepository for SqliteAppliedChangeRepository {
    async fn record_apply(&self, change: &AppliedChange, diff: &RuleDiff) -> DomainResult<()> {
        let metadata_json = serde_json::to_string(&change.metadata)?;
        let applied_at = format_datetime(change.applied_at);
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            r#"UPDATE rule_proposals SET status = 'applied', updated_at = ?
               WHERE id = ? AND status = 'proposed'"#,
        )
        .bind(&applied_at)
        .bind(change.proposal_id.to_string())
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            drop(tx);
            return Err(match self.proposal_status(change.proposal_id).await? {
                None => DomainError::ProposalNotFound(change.proposal_id),
                Some(status) => DomainError::InvalidStateTransition {
                    from: status,
                    to: ProposalStatus::Applied.as_str().to_string(),
                    reason: "only proposed proposals can be applied".to_string(),
                },
            });
        }

        sqlx::query(
            r#"INSERT INTO applied_changes (id, proposal_id, kind, status, version_before,
               version_after, rollback_token, metadata, applied_at, rolled_back_at,
               content_before)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(change.id.to_string())
        .bind(change.proposal_id.to_string())
        .bind(change.kind.as_str())
        .bind(change.status.as_str())
        .bind(&change.version_before)
        .bind(&change.version_after)
        .bind(change.rollback_token.to_string())
        .bind(&metadata_json)
        .bind(&applied_at)
        .bind(change.rolled_back_at.map(format_datetime))
        .bind(change.content_before.as_deref())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO rule_diffs (id, proposal_id, applied_change_id, target_slug, field,
               before_value, after_value, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(diff.id.to_string())
        .bind(diff.proposal_id.to_string())
        .bind(diff.applied_change_id.to_string())
        .bind(&diff.target_slug)
        .bind(&diff.field)
        .bind(serde_json::to_string(&diff.before)?)
        .bind(serde_json::to_string(&diff.after)?)
        .bind(format_datetime(diff.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_rollback(
        &self,
        change: &AppliedChange,
        event: &RollbackEvent,
    ) -> DomainResult<()> {
        let rolled_back_at = format_datetime(event.created_at);
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            r#"UPDATE applied_changes SET status = 'rolled_back', rolled_back_at = ?
               WHERE id = ? AND status = 'applied'"#,
        )
        .bind(&rolled_back_at)
        .bind(change.id.to_string())
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            drop(tx);
            return Err(match self.get(change.id).await? {
                None => DomainError::AppliedChangeNotFound(change.id),
                Some(existing) => DomainError::InvalidStateTransition {
                    from: existing.status.as_str().to_string(),
                    to: AppliedChangeStatus::RolledBack.as_str().to_string(),
                    reason: "change is not currently applied".to_string(),
                },
            });
        }

        sqlx::query("UPDATE rule_proposals SET status = 'rolled_back', updated_at = ? WHERE id = ?")
            .bind(&rolled_back_at)
            .bind(change.proposal_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO rollback_events (id, applied_change_id, proposal_id, reason,
               rollback_token, version_before, version_after, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.applied_change_id.to_string())
        .bind(event.proposal_id.to_string())
        .bind(&event.reason)
        .bind(event.rollback_token.to_string())
        .bind(&event.version_before)
        .bind(&event.version_after)
        .bind(&rolled_back_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<AppliedChange>> {
        let row: Option<AppliedChangeRow> =
            sqlx::query_as("SELECT * FROM applied_changes WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(AppliedChange::try_from).transpose()
    }

    async fn latest_applied(&self, scope: &RollbackScope) -> DomainResult<Option<AppliedChange>> {
        let rows: Vec<AppliedChangeRow> = sqlx::query_as(
            r#"SELECT * FROM applied_changes WHERE status = 'applied'
               ORDER BY applied_at DESC, rowid DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let change = AppliedChange::try_from(row)?;
            if scope.matches(&change.metadata) {
                return Ok(Some(change));
            }
        }
        Ok(None)
    }

    async fn list(&self, limit: usize) -> DomainResult<Vec<AppliedChange>> {
        let rows: Vec<AppliedChangeRow> = sqlx::query_as(
            "SELECT * FROM applied_changes ORDER BY applied_at DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AppliedChange::try_from).collect()
    }

    async fn list_diffs(&self, applied_change_id: Uuid) -> DomainResult<Vec<RuleDiff>> {
        let rows: Vec<RuleDiffRow> = sqlx::query_as(
            "SELECT * FROM rule_diffs WHERE applied_change_id = ? ORDER BY created_at ASC",
        )
        .bind(applied_change_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RuleDiff::try_from).collect()
    }

    async fn list_rollback_events(
        &self,
        applied_change_id: Uuid,
    ) -> DomainResult<Vec<RollbackEvent>> {
        let rows: Vec<RollbackEventRow> = sqlx::query_as(
            "SELECT * FROM rollback_events WHERE applied_change_id = ? ORDER BY created_at ASC",
        )
        .bind(applied_change_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RollbackEvent::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AppliedChangeRow {
    id: String,
    proposal_id: String,
    kind: String,
    status: String,
    version_before: String,
    version_after: String,
    rollback_token: String,
    metadata: String,
    applied_at: String,
    rolled_back_at: Option<String>,
    content_before: Option<Vec<u8>>,
}

impl TryFrom<AppliedChangeRow> for AppliedChange {
    type Error = DomainError;

    fn try_from(row: AppliedChangeRow) -> Result<Self, Self::Error> {
        let kind = ProposalKind::from_str(&row.kind).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid proposal kind: {}", row.kind))
        })?;
        let status = AppliedChangeStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid change status: {}", row.status))
        })?;

        Ok(AppliedChange {
            id: parse_uuid(&row.id)?,
            proposal_id: parse_uuid(&row.proposal_id)?,
            kind,
            status,
            version_before: row.version_before,
            version_after: row.version_after,
            rollback_token: parse_uuid(&row.rollback_token)?,
            metadata: serde_json::from_str(&row.metadata)?,
            applied_at: parse_datetime(&row.applied_at)?,
            rolled_back_at: parse_optional_datetime(row.rolled_back_at)?,
            content_before: row.content_before,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleDiffRow {
    id: String,
    proposal_id: String,
    applied_change_id: String,
    target_slug: String,
    field: String,
    before_value: String,
    after_value: String,
    created_at: String,
}

impl TryFrom<RuleDiffRow> for RuleDiff {
    type Error = DomainError;

    fn try_from(row: RuleDiffRow) -> Result<Self, Self::Error> {
        Ok(RuleDiff {
            id: parse_uuid(&row.id)?,
            proposal_id: parse_uuid(&row.proposal_id)?,
            applied_change_id: parse_uuid(&row.applied_change_id)?,
            target_slug: row.target_slug,
            field: row.field,
            before: serde_json::from_str(&row.before_value)?,
            after: serde_json::from_str(&row.after_value)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RollbackEventRow {
    id: String,
    applied_change_id: String,
    proposal_id: String,
    reason: String,
    rollback_token: String,
    version_before: String,
    version_after: String,
    created_at: String,
}

impl TryFrom<RollbackEventRow> for RollbackEvent {
    type Error = DomainError;

    fn try_from(row: RollbackEventRow) -> Result<Self, Self::Error> {
        Ok(RollbackEvent {
            id: parse_uuid(&row.id)?,
            applied_change_id: parse_uuid(&row.applied_change_id)?,
            proposal_id: parse_uuid(&row.proposal_id)?,
            reason: row.reason,
            rollback_token: parse_uuid(&row.rollback_token)?,
            version_before: row.version_before,
            version_after: row.version_after,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
