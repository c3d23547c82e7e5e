use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RulesDocument, RulesSnapshot};

/// Port for the shared categorization rules.
///
/// This is the one genuinely shared mutable resource. Writes are
/// compare-and-swap on the content version; `restore` is the compensating
/// write used when the database half of an apply or rollback fails.
#[async_trait]
pub trait RulesRepository: Send + Sync {
    /// Read the current rules and their version
    async fn read(&self) -> DomainResult<RulesSnapshot>;

    /// Replace the rules if the stored version still equals `expected_version`
    async fn compare_and_swap(
        &self,
        expected_version: &str,
        document: &RulesDocument,
    ) -> DomainResult<RulesSnapshot>;

    /// Like `compare_and_swap`, but writes `raw` exactly as given
    async fn compare_and_swap_bytes(
        &self,
        expected_version: &str,
        raw: &[u8],
    ) -> DomainResult<RulesSnapshot>;

    /// Unconditionally write back the exact bytes of a snapshot
    async fn restore(&self, snapshot: &RulesSnapshot) -> DomainResult<()>;
}
