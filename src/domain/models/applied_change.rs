//! Applied changes, rule diffs and rollback events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::proposal::{PatchAction, ProposalKind};
use super::run_attempt::ApplyMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppliedChangeStatus {
    #[default]
    Applied,
    RolledBack,
}

impl AppliedChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::RolledBack => "rolled_back",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(Self::Applied),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

/// Everything needed to invert an apply later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChangeMetadata {
    pub target_slug: String,
    pub field: String,
    pub action: PatchAction,
    /// Field value before the apply; `null` when the field was unset.
    pub old_value: Value,
    pub new_value: Value,
    /// The apply did not change the rules file.
    #[serde(default)]
    pub synthetic: bool,
    /// The apply created the target rule, so rollback may remove it.
    #[serde(default)]
    pub created_rule: bool,
    pub batch_id: Option<Uuid>,
    pub run_id: Option<String>,
    pub apply_mode: ApplyMode,
}

/// A committed proposal with rollback metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub kind: ProposalKind,
    pub status: AppliedChangeStatus,
    pub version_before: String,
    pub version_after: String,
    pub rollback_token: Uuid,
    pub metadata: AppliedChangeMetadata,
    pub applied_at: DateTime<Utc>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Rules file bytes before the apply. `None` for synthetic changes.
    #[serde(skip)]
    pub content_before: Option<Vec<u8>>,
}

impl AppliedChange {
    pub fn new(
        proposal_id: Uuid,
        kind: ProposalKind,
        version_before: impl Into<String>,
        version_after: impl Into<String>,
        metadata: AppliedChangeMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal_id,
            kind,
            status: AppliedChangeStatus::Applied,
            version_before: version_before.into(),
            version_after: version_after.into(),
            rollback_token: Uuid::new_v4(),
            metadata,
            applied_at: Utc::now(),
            rolled_back_at: None,
            content_before: None,
        }
    }

    pub fn with_content_before(mut self, raw: Vec<u8>) -> Self {
        self.content_before = Some(raw);
        self
    }

    /// The change can be undone by writing its pre-apply bytes back: it
    /// touched the file and nothing has been written since.
    pub fn restores_exactly(&self, current_version: &str) -> bool {
        !self.metadata.synthetic
            && self.content_before.is_some()
            && self.version_after == current_version
    }
}

/// Before/after record of one rule field, written alongside every apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDiff {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub applied_change_id: Uuid,
    pub target_slug: String,
    pub field: String,
    pub before: Value,
    pub after: Value,
    pub created_at: DateTime<Utc>,
}

impl RuleDiff {
    pub fn for_change(change: &AppliedChange) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposal_id: change.proposal_id,
            applied_change_id: change.id,
            target_slug: change.metadata.target_slug.clone(),
            field: change.metadata.field.clone(),
            before: change.metadata.old_value.clone(),
            after: change.metadata.new_value.clone(),
            created_at: change.applied_at,
        }
    }
}

/// Audit row for a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub id: Uuid,
    pub applied_change_id: Uuid,
    pub proposal_id: Uuid,
    pub reason: String,
    pub rollback_token: Uuid,
    pub version_before: String,
    pub version_after: String,
    pub created_at: DateTime<Utc>,
}

/// Scope used to pick which applied change a degrade rollback targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackScope {
    pub batch_id: Option<Uuid>,
    pub run_id: Option<String>,
}

impl RollbackScope {
    pub fn batch(batch_id: Uuid) -> Self {
        Self { batch_id: Some(batch_id), run_id: None }
    }

    pub fn matches(&self, metadata: &AppliedChangeMetadata) -> bool {
        let batch_ok = self.batch_id.map_or(true, |b| metadata.batch_id == Some(b));
        let run_ok = self
            .run_id
            .as_ref()
            .map_or(true, |r| metadata.run_id.as_ref() == Some(r));
        batch_ok && run_ok
    }
}
