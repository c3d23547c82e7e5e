use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AppliedChange, RollbackEvent, RollbackScope, RuleDiff};

/// Repository port for applied changes and their audit rows.
///
/// `record_apply` and `record_rollback` each run in a single transaction; the
/// rules file write that precedes them is compensated by the caller.
#[async_trait]
pub trait AppliedChangeRepository: Send + Sync {
    /// Insert the diff and the applied change, and flip the proposal from
    /// `proposed` to `applied`.
    async fn record_apply(&self, change: &AppliedChange, diff: &RuleDiff) -> DomainResult<()>;

    /// Mark the change and its proposal `rolled_back` and insert the event.
    async fn record_rollback(
        &self,
        change: &AppliedChange,
        event: &RollbackEvent,
    ) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<AppliedChange>>;

    /// Most recent still-applied change matching the scope
    async fn latest_applied(&self, scope: &RollbackScope) -> DomainResult<Option<AppliedChange>>;

    /// Applied changes, newest first
    async fn list(&self, limit: usize) -> DomainResult<Vec<AppliedChange>>;

    async fn list_diffs(&self, applied_change_id: Uuid) -> DomainResult<Vec<RuleDiff>>;

    async fn list_rollback_events(
        &self,
        applied_change_id: Uuid,
    ) -> DomainResult<Vec<RollbackEvent>>;
}
