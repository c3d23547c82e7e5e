use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BenchmarkSnapshot, HarnessRun};

/// Repository port for benchmark snapshots, QA feedback and harness runs
#[async_trait]
pub trait BenchmarkRepository: Send + Sync {
    async fn latest_snapshot(&self, store_id: &str) -> DomainResult<Option<BenchmarkSnapshot>>;

    async fn insert_snapshot(&self, snapshot: &BenchmarkSnapshot) -> DomainResult<()>;

    /// Number of QA feedback rows collected for a store
    async fn qa_feedback_count(&self, store_id: &str) -> DomainResult<u64>;

    /// Record one reviewer verdict on a categorized product
    async fn record_qa_feedback(
        &self,
        store_id: &str,
        product_id: &str,
        verdict: &str,
    ) -> DomainResult<()>;

    async fn record_harness_run(&self, run: &HarnessRun) -> DomainResult<()>;

    async fn list_harness_runs(&self, batch_id: Uuid) -> DomainResult<Vec<HarnessRun>>;
}
