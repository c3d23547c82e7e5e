//! Rule-patch proposals.
//!
//! A proposal is a candidate edit to one field of one category rule. Proposals
//! are stored before anything is applied so that a human can review what the
//! loop wanted to do even when the apply mode was `none`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Category of rule edit a proposal makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    /// Include/exclude term list edits.
    KeywordPatch,
    /// Confidence threshold edits.
    ThresholdPatch,
    /// Rule-schema edits (required attributes). Structural.
    SchemaPatch,
}

impl ProposalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeywordPatch => "keyword_patch",
            Self::ThresholdPatch => "threshold_patch",
            Self::SchemaPatch => "schema_patch",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "keyword_patch" => Some(Self::KeywordPatch),
            "threshold_patch" => Some(Self::ThresholdPatch),
            "schema_patch" => Some(Self::SchemaPatch),
            _ => None,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Self::SchemaPatch)
    }
}

/// Lifecycle status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Proposed,
    Applied,
    Rejected,
    RolledBack,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::RolledBack => "rolled_back",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(Self::Proposed),
            "applied" => Some(Self::Applied),
            "rejected" => Some(Self::Rejected),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

/// Edit operation on a rule field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchAction {
    Set,
    Add,
    Remove,
}

impl PatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

/// Fields of a category rule that proposals may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    MinConfidence,
    AutoAcceptThreshold,
    IncludeTerms,
    ExcludeTerms,
    RequiredAttributes,
}

impl RuleField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinConfidence => "min_confidence",
            Self::AutoAcceptThreshold => "auto_accept_threshold",
            Self::IncludeTerms => "include_terms",
            Self::ExcludeTerms => "exclude_terms",
            Self::RequiredAttributes => "required_attributes",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "min_confidence" => Some(Self::MinConfidence),
            "auto_accept_threshold" => Some(Self::AutoAcceptThreshold),
            "include_terms" => Some(Self::IncludeTerms),
            "exclude_terms" => Some(Self::ExcludeTerms),
            "required_attributes" => Some(Self::RequiredAttributes),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::IncludeTerms | Self::ExcludeTerms | Self::RequiredAttributes
        )
    }

    /// The proposal kind an edit of this field belongs to.
    pub fn kind(&self) -> ProposalKind {
        match self {
            Self::MinConfidence | Self::AutoAcceptThreshold => ProposalKind::ThresholdPatch,
            Self::IncludeTerms | Self::ExcludeTerms => ProposalKind::KeywordPatch,
            Self::RequiredAttributes => ProposalKind::SchemaPatch,
        }
    }
}

/// What a proposal wants to change. `field` stays a string so that malformed
/// payloads can be stored and reported instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub target_slug: String,
    pub field: String,
    pub action: PatchAction,
    pub value: Value,
    #[serde(default)]
    pub reason: String,
}

/// Severity of a payload-schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Low,
    High,
}

/// A problem found while validating a proposal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadViolation {
    pub severity: ViolationSeverity,
    pub message: String,
}

impl PayloadViolation {
    fn high(message: impl Into<String>) -> Self {
        Self { severity: ViolationSeverity::High, message: message.into() }
    }

    fn low(message: impl Into<String>) -> Self {
        Self { severity: ViolationSeverity::Low, message: message.into() }
    }
}

impl ProposalPayload {
    pub fn rule_field(&self) -> Option<RuleField> {
        RuleField::from_str(&self.field)
    }

    /// Check the payload against the rule schema.
    pub fn validate(&self) -> Vec<PayloadViolation> {
        let mut violations = Vec::new();

        if self.target_slug.trim().is_empty() {
            violations.push(PayloadViolation::high("target_slug is empty"));
        }
        if self.reason.trim().is_empty() {
            violations.push(PayloadViolation::low("reason is empty"));
        }

        let Some(field) = self.rule_field() else {
            violations.push(PayloadViolation::high(format!("unknown field '{}'", self.field)));
            return violations;
        };

        if field.is_list() {
            if self.action == PatchAction::Set {
                violations.push(PayloadViolation::high(format!(
                    "action 'set' is not valid for list field '{}'",
                    field.as_str()
                )));
            }
            match self.value.as_str() {
                Some(term) if !term.trim().is_empty() => {}
                _ => violations.push(PayloadViolation::high(format!(
                    "list field '{}' needs a non-empty string value",
                    field.as_str()
                ))),
            }
        } else {
            if self.action != PatchAction::Set {
                violations.push(PayloadViolation::high(format!(
                    "only 'set' is valid for scalar field '{}'",
                    field.as_str()
                )));
            }
            match self.value.as_f64() {
                Some(v) if (0.0..=1.0).contains(&v) => {}
                Some(v) => violations.push(PayloadViolation::high(format!(
                    "threshold {v} is outside [0, 1]"
                ))),
                None => violations.push(PayloadViolation::high(format!(
                    "scalar field '{}' needs a numeric value",
                    field.as_str()
                ))),
            }
        }

        violations
    }

    pub fn has_high_severity_violation(&self) -> bool {
        self.validate()
            .iter()
            .any(|v| v.severity == ViolationSeverity::High)
    }
}

/// A candidate rule-file edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub batch_id: Option<Uuid>,
    pub run_id: Option<String>,
    pub kind: ProposalKind,
    pub status: ProposalStatus,
    pub confidence_score: f64,
    pub expected_impact_score: f64,
    pub payload: ProposalPayload,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(kind: ProposalKind, payload: ProposalPayload, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id: None,
            run_id: None,
            kind,
            status: ProposalStatus::Proposed,
            confidence_score: 0.0,
            expected_impact_score: 0.0,
            payload,
            source: source.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_scope(mut self, batch_id: Uuid, run_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id);
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_scores(mut self, confidence: f64, expected_impact: f64) -> Self {
        self.confidence_score = confidence;
        self.expected_impact_score = expected_impact;
        self
    }

    pub fn is_structural(&self) -> bool {
        self.kind.is_structural()
    }
}
