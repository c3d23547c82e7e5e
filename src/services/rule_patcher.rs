//! Rule patch application and rollback.
//!
//! Applying a proposal is a two-step saga: compare-and-swap the rules file,
//! then record the change in one database transaction. When the database
//! step fails the pre-write snapshot is restored. Rollback runs the same
//! saga with the inverse edit.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AppliedChange, AppliedChangeMetadata, AppliedChangeStatus, ApplyMode, PatchAction, Proposal,
    ProposalPayload, ProposalStatus, RollbackEvent, RollbackScope, RuleDiff, RuleField,
    RulesDocument, RulesSnapshot, ViolationSeverity,
};
use crate::domain::ports::{AppliedChangeRepository, RulesRepository};

/// Rollback reason used when the harness finds the candidate worse.
pub const HARNESS_DEGRADE_REASON: &str = "harness_degrade_detected";

/// Result of computing a patch against a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    pub document: RulesDocument,
    pub old_value: Value,
    pub new_value: Value,
    pub changed: bool,
    pub created_rule: bool,
}

/// Compute the document a payload produces. Pure.
pub fn apply_patch(
    document: &RulesDocument,
    payload: &ProposalPayload,
) -> DomainResult<PatchOutcome> {
    let high = payload
        .validate()
        .into_iter()
        .find(|v| v.severity == ViolationSeverity::High);
    if let Some(violation) = high {
        return Err(DomainError::PatchRejected(violation.message));
    }
    let field = payload.rule_field().ok_or_else(|| {
        DomainError::PatchRejected(format!("unknown field '{}'", payload.field))
    })?;

    let existing = document.rule(&payload.target_slug);
    let created_rule = existing.is_none();
    let mut rule = existing.cloned().unwrap_or_default();
    let old_value = rule.field_value(field);

    if let Some(list) = rule.list_mut(field) {
        let term = payload.value.as_str().unwrap_or_default().trim().to_string();
        match payload.action {
            PatchAction::Add => {
                if !list.contains(&term) {
                    list.push(term);
                }
            }
            PatchAction::Remove => list.retain(|t| *t != term),
            PatchAction::Set => {
                return Err(DomainError::PatchRejected(format!(
                    "cannot set list field '{}'",
                    field.as_str()
                )));
            }
        }
    } else {
        rule.set_scalar(field, payload.value.as_f64());
    }

    let new_value = rule.field_value(field);
    let changed = new_value != old_value;
    let mut document = document.clone();
    if changed {
        document.categories.insert(payload.target_slug.clone(), rule);
    }

    Ok(PatchOutcome {
        document,
        old_value,
        new_value,
        changed,
        created_rule: created_rule && changed,
    })
}

fn value_terms(value: &Value) -> DomainResult<Vec<String>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value.clone()).map_err(|e| {
        DomainError::SerializationError(format!("stored list value is not a string array: {e}"))
    })
}

/// Compute the document with an applied change undone. Pure.
///
/// Scalars get their old value back (unset when it was `null`). Lists lose
/// the terms the apply added and regain the ones it removed, leaving any
/// other edits made since in place. A rule the apply created is dropped once
/// it is empty again.
pub fn invert_patch(
    document: &RulesDocument,
    metadata: &AppliedChangeMetadata,
) -> DomainResult<RulesDocument> {
    let mut document = document.clone();
    if metadata.synthetic {
        return Ok(document);
    }
    let field = RuleField::from_str(&metadata.field).ok_or_else(|| {
        DomainError::PatchRejected(format!("unknown field '{}'", metadata.field))
    })?;

    let mut rule = document
        .rule(&metadata.target_slug)
        .cloned()
        .unwrap_or_default();

    if let Some(list) = rule.list_mut(field) {
        let old = value_terms(&metadata.old_value)?;
        let new = value_terms(&metadata.new_value)?;
        list.retain(|t| old.contains(t) || !new.contains(t));
        for term in old.iter().filter(|t| !new.contains(t)) {
            if !list.contains(term) {
                list.push(term.clone());
            }
        }
    } else {
        rule.set_scalar(field, metadata.old_value.as_f64());
    }

    if metadata.created_rule && rule.is_empty() {
        document.categories.remove(&metadata.target_slug);
    } else {
        document.categories.insert(metadata.target_slug.clone(), rule);
    }
    Ok(document)
}

/// Applies proposals to the rules file and rolls them back.
pub struct RulePatchApplier {
    rules: Arc<dyn RulesRepository>,
    changes: Arc<dyn AppliedChangeRepository>,
}

impl RulePatchApplier {
    pub fn new(rules: Arc<dyn RulesRepository>, changes: Arc<dyn AppliedChangeRepository>) -> Self {
        Self { rules, changes }
    }

    /// Put the rules file back after the database half of a write failed.
    /// Returns the error the caller should surface.
    async fn compensate(&self, snapshot: &RulesSnapshot, cause: DomainError) -> DomainError {
        tracing::warn!(
            error = %cause,
            version = %snapshot.version,
            "database write failed, restoring rules file"
        );
        match self.rules.restore(snapshot).await {
            Ok(()) => cause,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    version = %snapshot.version,
                    "failed to restore rules file"
                );
                DomainError::RulesDiverged {
                    cause: cause.to_string(),
                    restore_error: e.to_string(),
                }
            }
        }
    }

    /// Apply one proposal. A patch that leaves the document unchanged is
    /// recorded as a synthetic change without touching the file.
    #[instrument(
        skip(self, proposal),
        fields(proposal_id = %proposal.id, mode = mode.as_str()),
        err
    )]
    pub async fn apply(&self, proposal: &Proposal, mode: ApplyMode) -> DomainResult<AppliedChange> {
        if proposal.status != ProposalStatus::Proposed {
            return Err(DomainError::InvalidStateTransition {
                from: proposal.status.as_str().to_string(),
                to: ProposalStatus::Applied.as_str().to_string(),
                reason: "only proposed proposals can be applied".to_string(),
            });
        }

        let before = self.rules.read().await?;
        let outcome = apply_patch(&before.document, &proposal.payload)?;

        let version_after = if outcome.changed {
            self.rules
                .compare_and_swap(&before.version, &outcome.document)
                .await?
                .version
        } else {
            before.version.clone()
        };

        let mut change = AppliedChange::new(
            proposal.id,
            proposal.kind,
            before.version.clone(),
            version_after,
            AppliedChangeMetadata {
                target_slug: proposal.payload.target_slug.clone(),
                field: proposal.payload.field.clone(),
                action: proposal.payload.action,
                old_value: outcome.old_value,
                new_value: outcome.new_value,
                synthetic: !outcome.changed,
                created_rule: outcome.created_rule,
                batch_id: proposal.batch_id,
                run_id: proposal.run_id.clone(),
                apply_mode: mode,
            },
        );
        if outcome.changed {
            change = change.with_content_before(before.raw.clone());
        }
        let diff = RuleDiff::for_change(&change);

        if let Err(e) = self.changes.record_apply(&change, &diff).await {
            if outcome.changed {
                return Err(self.compensate(&before, e).await);
            }
            return Err(e);
        }

        tracing::info!(
            change_id = %change.id,
            slug = %change.metadata.target_slug,
            field = %change.metadata.field,
            synthetic = change.metadata.synthetic,
            "applied rule patch"
        );
        Ok(change)
    }

    /// Roll back one applied change by id.
    #[instrument(skip(self), err)]
    pub async fn rollback(&self, change_id: Uuid, reason: &str) -> DomainResult<RollbackEvent> {
        let change = self
            .changes
            .get(change_id)
            .await?
            .ok_or(DomainError::AppliedChangeNotFound(change_id))?;
        self.rollback_change(&change, reason).await
    }

    /// Roll back the most recent applied change in scope, if any.
    pub async fn rollback_latest(
        &self,
        scope: &RollbackScope,
        reason: &str,
    ) -> DomainResult<Option<RollbackEvent>> {
        match self.changes.latest_applied(scope).await? {
            Some(change) => self.rollback_change(&change, reason).await.map(Some),
            None => Ok(None),
        }
    }

    async fn rollback_change(
        &self,
        change: &AppliedChange,
        reason: &str,
    ) -> DomainResult<RollbackEvent> {
        if change.status != AppliedChangeStatus::Applied {
            return Err(DomainError::InvalidStateTransition {
                from: change.status.as_str().to_string(),
                to: AppliedChangeStatus::RolledBack.as_str().to_string(),
                reason: "change is not currently applied".to_string(),
            });
        }

        let before = self.rules.read().await?;

        // Nothing has touched the file since this change: put its old bytes
        // back verbatim. Otherwise undo just this field.
        let (wrote, version_after) = match change.content_before.as_deref() {
            Some(raw) if change.restores_exactly(&before.version) => {
                let restored = self
                    .rules
                    .compare_and_swap_bytes(&before.version, raw)
                    .await?;
                (true, restored.version)
            }
            _ => {
                let inverted = invert_patch(&before.document, &change.metadata)?;
                if !change.metadata.synthetic && inverted != before.document {
                    let swapped = self
                        .rules
                        .compare_and_swap(&before.version, &inverted)
                        .await?;
                    (true, swapped.version)
                } else {
                    (false, before.version.clone())
                }
            }
        };

        let event = RollbackEvent {
            id: Uuid::new_v4(),
            applied_change_id: change.id,
            proposal_id: change.proposal_id,
            reason: reason.to_string(),
            rollback_token: change.rollback_token,
            version_before: before.version.clone(),
            version_after,
            created_at: Utc::now(),
        };

        if let Err(e) = self.changes.record_rollback(change, &event).await {
            if wrote {
                return Err(self.compensate(&before, e).await);
            }
            return Err(e);
        }

        tracing::info!(
            change_id = %change.id,
            reason,
            wrote_file = wrote,
            "rolled back rule patch"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::filesystem::FileRulesRepository;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAppliedChangeRepository, SqliteProposalRepository,
    };
    use crate::domain::models::{CategoryRule, ProposalKind};
    use crate::domain::ports::ProposalRepository;
    use async_trait::async_trait;
    use serde_json::json;

    fn payload(slug: &str, field: RuleField, action: PatchAction, value: Value) -> ProposalPayload {
        ProposalPayload {
            target_slug: slug.to_string(),
            field: field.as_str().to_string(),
            action,
            value,
            reason: "test".to_string(),
        }
    }

    fn seeded_document() -> RulesDocument {
        let mut doc = RulesDocument::default();
        doc.categories.insert(
            "boots".to_string(),
            CategoryRule {
                min_confidence: Some(0.6),
                include_terms: vec!["boot".to_string(), "chelsea".to_string()],
                ..Default::default()
            },
        );
        doc
    }

    fn metadata(outcome: &PatchOutcome, p: &ProposalPayload) -> AppliedChangeMetadata {
        AppliedChangeMetadata {
            target_slug: p.target_slug.clone(),
            field: p.field.clone(),
            action: p.action,
            old_value: outcome.old_value.clone(),
            new_value: outcome.new_value.clone(),
            synthetic: !outcome.changed,
            created_rule: outcome.created_rule,
            batch_id: None,
            run_id: None,
            apply_mode: ApplyMode::Full,
        }
    }

    #[test]
    fn test_scalar_patch_round_trip() {
        let doc = seeded_document();
        let p = payload("boots", RuleField::AutoAcceptThreshold, PatchAction::Set, json!(0.7));
        let outcome = apply_patch(&doc, &p).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.old_value, Value::Null);

        let restored = invert_patch(&outcome.document, &metadata(&outcome, &p)).unwrap();
        assert_eq!(restored.to_canonical_bytes().unwrap(), doc.to_canonical_bytes().unwrap());
    }

    #[test]
    fn test_list_rollback_keeps_later_edits() {
        let doc = seeded_document();
        let p = payload("boots", RuleField::IncludeTerms, PatchAction::Remove, json!("chelsea"));
        let outcome = apply_patch(&doc, &p).unwrap();

        let mut edited = outcome.document.clone();
        if let Some(rule) = edited.categories.get_mut("boots") {
            rule.include_terms.push("wellington".to_string());
        }

        let restored = invert_patch(&edited, &metadata(&outcome, &p)).unwrap();
        let terms = &restored.rule("boots").unwrap().include_terms;
        assert_eq!(terms.len(), 3);
        assert!(terms.contains(&"chelsea".to_string()));
        assert!(terms.contains(&"wellington".to_string()));
    }

    #[test]
    fn test_created_rule_is_removed_on_rollback() {
        let doc = seeded_document();
        let p = payload("sandals", RuleField::ExcludeTerms, PatchAction::Add, json!("boot"));
        let outcome = apply_patch(&doc, &p).unwrap();
        assert!(outcome.created_rule);

        let restored = invert_patch(&outcome.document, &metadata(&outcome, &p)).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_noop_patch_is_not_a_change() {
        let doc = seeded_document();
        let p = payload("boots", RuleField::IncludeTerms, PatchAction::Add, json!("boot"));
        let outcome = apply_patch(&doc, &p).unwrap();
        assert!(!outcome.changed);
        assert!(!outcome.created_rule);
        assert_eq!(outcome.document, doc);
    }

    #[test]
    fn test_invalid_payload_is_rejected() {
        let p = payload("boots", RuleField::IncludeTerms, PatchAction::Set, json!("x"));
        assert!(matches!(apply_patch(&seeded_document(), &p), Err(DomainError::PatchRejected(_))));
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        rules: Arc<FileRulesRepository>,
        proposals: SqliteProposalRepository,
        applier: RulePatchApplier,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let rules = Arc::new(FileRulesRepository::new(dir.path().join("rules.json")));
        let version = rules.read().await.unwrap().version;
        rules
            .compare_and_swap(&version, &seeded_document())
            .await
            .unwrap();
        let pool = create_migrated_test_pool().await.unwrap();
        let applier = RulePatchApplier::new(
            rules.clone(),
            Arc::new(SqliteAppliedChangeRepository::new(pool.clone())),
        );
        Fixture {
            _dir: dir,
            rules,
            proposals: SqliteProposalRepository::new(pool),
            applier,
        }
    }

    fn proposal(p: ProposalPayload) -> Proposal {
        Proposal::new(ProposalKind::ThresholdPatch, p, "test").with_scope(Uuid::new_v4(), "run-1")
    }

    #[tokio::test]
    async fn test_apply_then_rollback_restores_bytes() {
        let fx = fixture().await;
        let original = fx.rules.read().await.unwrap();
        let p = proposal(payload("boots", RuleField::MinConfidence, PatchAction::Set, json!(0.5)));
        fx.proposals.insert(&p).await.unwrap();

        let change = fx.applier.apply(&p, ApplyMode::Full).await.unwrap();
        assert_ne!(fx.rules.read().await.unwrap().version, original.version);

        let event = fx.applier.rollback(change.id, "manual").await.unwrap();
        let after = fx.rules.read().await.unwrap();
        assert_eq!(after.raw, original.raw);
        assert_eq!(event.version_after, original.version);
        assert_eq!(event.rollback_token, change.rollback_token);
    }

    #[tokio::test]
    async fn test_failed_record_restores_file() {
        let fx = fixture().await;
        let original = fx.rules.read().await.unwrap();
        // Never inserted, so the database half fails.
        let p = proposal(payload("boots", RuleField::MinConfidence, PatchAction::Set, json!(0.5)));

        let err = fx.applier.apply(&p, ApplyMode::Full).await.unwrap_err();
        assert!(matches!(err, DomainError::ProposalNotFound(_)));
        assert_eq!(fx.rules.read().await.unwrap().raw, original.raw);
    }

    #[tokio::test]
    async fn test_synthetic_apply_writes_nothing() {
        let fx = fixture().await;
        let original = fx.rules.read().await.unwrap();
        let p = proposal(payload(
            "boots",
            RuleField::IncludeTerms,
            PatchAction::Add,
            json!("boot"),
        ));
        fx.proposals.insert(&p).await.unwrap();

        let change = fx.applier.apply(&p, ApplyMode::PartialLowRisk).await.unwrap();
        assert!(change.metadata.synthetic);
        assert_eq!(change.version_before, change.version_after);

        let event = fx
            .applier
            .rollback_latest(&RollbackScope::default(), HARNESS_DEGRADE_REASON)
            .await
            .unwrap();
        assert_eq!(event.unwrap().reason, HARNESS_DEGRADE_REASON);
        assert_eq!(fx.rules.read().await.unwrap().raw, original.raw);
    }

    #[tokio::test]
    async fn test_double_rollback_is_rejected() {
        let fx = fixture().await;
        let p = proposal(payload("boots", RuleField::MinConfidence, PatchAction::Set, json!(0.5)));
        fx.proposals.insert(&p).await.unwrap();
        let change = fx.applier.apply(&p, ApplyMode::Full).await.unwrap();

        fx.applier.rollback(change.id, "first").await.unwrap();
        let err = fx.applier.rollback(change.id, "second").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert!(fx
            .applier
            .rollback_latest(&RollbackScope::default(), "none")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_hand_written_file_keeps_unknown_keys_and_bytes() {
        let fx = fixture().await;
        let hand_written = br#"{
    "schema_version": 3,
    "categories": {
        "boots": { "min_confidence": 0.6, "lexical_weight": 0.4 }
    }
}
"#
        .to_vec();
        let current = fx.rules.read().await.unwrap();
        fx.rules.compare_and_swap_bytes(&current.version, &hand_written).await.unwrap();

        let p = proposal(payload("boots", RuleField::MinConfidence, PatchAction::Set, json!(0.5)));
        fx.proposals.insert(&p).await.unwrap();
        let change = fx.applier.apply(&p, ApplyMode::Full).await.unwrap();

        let applied = fx.rules.read().await.unwrap().document;
        assert_eq!(applied.extra.get("schema_version"), Some(&json!(3)));
        let boots = applied.rule("boots").unwrap();
        assert_eq!(boots.min_confidence, Some(0.5));
        assert_eq!(boots.extra.get("lexical_weight"), Some(&json!(0.4)));

        fx.applier.rollback(change.id, "manual").await.unwrap();
        assert_eq!(fx.rules.read().await.unwrap().raw, hand_written);
    }

    /// Rules store whose compensating write always fails.
    struct UnrestorableRules(Arc<FileRulesRepository>);

    #[async_trait]
    impl RulesRepository for UnrestorableRules {
        async fn read(&self) -> DomainResult<RulesSnapshot> {
            self.0.read().await
        }

        async fn compare_and_swap(
            &self,
            expected_version: &str,
            document: &RulesDocument,
        ) -> DomainResult<RulesSnapshot> {
            self.0.compare_and_swap(expected_version, document).await
        }

        async fn compare_and_swap_bytes(
            &self,
            expected_version: &str,
            raw: &[u8],
        ) -> DomainResult<RulesSnapshot> {
            self.0.compare_and_swap_bytes(expected_version, raw).await
        }

        async fn restore(&self, _snapshot: &RulesSnapshot) -> DomainResult<()> {
            Err(DomainError::RulesStorage("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_restore_reports_divergence() {
        let fx = fixture().await;
        let pool = create_migrated_test_pool().await.unwrap();
        let applier = RulePatchApplier::new(
            Arc::new(UnrestorableRules(fx.rules.clone())),
            Arc::new(SqliteAppliedChangeRepository::new(pool)),
        );
        // Never inserted, so the database half fails and the restore runs.
        let p = proposal(payload("boots", RuleField::MinConfidence, PatchAction::Set, json!(0.5)));

        let err = applier.apply(&p, ApplyMode::Full).await.unwrap_err();
        assert!(matches!(err, DomainError::RulesDiverged { .. }), "got {err}");
        assert!(err.is_fatal());
        assert!(!DomainError::ProposalNotFound(p.id).is_fatal());
    }
}
