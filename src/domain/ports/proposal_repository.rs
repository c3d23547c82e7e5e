use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Proposal, ProposalStatus};

/// Filters for querying proposals
#[derive(Default, Debug, Clone)]
pub struct ProposalFilter {
    pub batch_id: Option<Uuid>,
    pub run_id: Option<String>,
    pub status: Option<ProposalStatus>,
    pub limit: Option<i64>,
}

/// Repository port for rule-patch proposals
#[async_trait]
pub trait ProposalRepository: Send + Sync {
    async fn insert(&self, proposal: &Proposal) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Proposal>>;

    async fn list(&self, filter: ProposalFilter) -> DomainResult<Vec<Proposal>>;

    /// Change the status of a proposal outside an apply/rollback
    async fn update_status(&self, id: Uuid, status: ProposalStatus) -> DomainResult<()>;
}
