use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CanaryState, PipelineRunRecord, RunStats};

/// Repository port for pipeline run statistics and canary state.
///
/// Pipeline runners write runs here; the gate and the harness read them back
/// by run id.
#[async_trait]
pub trait RunStatsRepository: Send + Sync {
    async fn record_run(&self, run: &PipelineRunRecord) -> DomainResult<()>;

    async fn get_run(&self, run_id: &str) -> DomainResult<Option<PipelineRunRecord>>;

    /// Statistics of a run; fails with `PipelineRunNotFound` when missing
    async fn get_stats(&self, run_id: &str) -> DomainResult<RunStats>;

    /// Most recent non-failed run for the store other than `exclude_run_id`
    async fn find_baseline(
        &self,
        store_id: &str,
        exclude_run_id: &str,
    ) -> DomainResult<Option<PipelineRunRecord>>;

    /// Latest runs for a store, newest first
    async fn recent_runs(&self, store_id: &str, limit: u32) -> DomainResult<Vec<PipelineRunRecord>>;

    async fn get_canary_state(&self, store_id: &str) -> DomainResult<Option<CanaryState>>;

    async fn set_canary_state(&self, state: &CanaryState) -> DomainResult<()>;
}
