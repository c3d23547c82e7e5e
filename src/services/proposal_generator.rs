//! Turns confusion alerts and failed metrics into rule-patch proposals.
//!
//! Scoring is deliberately simple: confusion alerts become keyword patches
//! whose confidence grows with the alert count, and failed metrics become
//! fixed-step threshold or schema patches on the most affected category.

use serde_json::json;
use uuid::Uuid;

use crate::domain::models::{
    PatchAction, Proposal, ProposalConfig, ProposalKind, ProposalPayload, RuleField, RulesDocument,
    RunStats,
};
use crate::services::quality_gate::{
    ATTRIBUTE_VALIDATION_FAIL_RATE, AUTO_ACCEPTED_RATE, CANARY_AUTO_ACCEPTED_RATE,
    FALLBACK_CATEGORY_RATE, NEEDS_REVIEW_RATE,
};

const THRESHOLD_STEP: f64 = 0.05;
const DEFAULT_AUTO_ACCEPT_THRESHOLD: f64 = 0.80;
const DEFAULT_MIN_CONFIDENCE: f64 = 0.60;
const AUTO_ACCEPT_FLOOR: f64 = 0.50;
const MIN_CONFIDENCE_FLOOR: f64 = 0.30;

/// Everything the generator looks at for one attempt.
#[derive(Debug, Clone)]
pub struct ProposalContext<'a> {
    pub batch_id: Uuid,
    pub run_id: &'a str,
    pub stats: &'a RunStats,
    pub failed_metrics: &'a [String],
    pub rules: &'a RulesDocument,
    pub degrade_mode: bool,
}

#[derive(Debug, Clone)]
pub struct ProposalGenerator {
    config: ProposalConfig,
}

impl ProposalGenerator {
    pub fn new(config: ProposalConfig) -> Self {
        Self { config }
    }

    /// Minimum confidence in effect; raised in degrade mode.
    pub fn min_confidence(&self, degrade_mode: bool) -> f64 {
        if degrade_mode {
            self.config.min_confidence.max(self.config.degrade_min_confidence)
        } else {
            self.config.min_confidence
        }
    }

    pub fn structural_allowed(&self, degrade_mode: bool) -> bool {
        self.config.allow_structural && !degrade_mode
    }

    /// Bounded, filtered, deduplicated proposals ordered by confidence.
    pub fn generate(&self, ctx: &ProposalContext<'_>) -> Vec<Proposal> {
        let mut candidates = keyword_candidates(ctx);
        candidates.extend(metric_candidates(ctx));

        let min_confidence = self.min_confidence(ctx.degrade_mode);
        let structural_allowed = self.structural_allowed(ctx.degrade_mode);

        let mut kept: Vec<Proposal> = Vec::new();
        for proposal in candidates {
            if proposal.confidence_score < min_confidence {
                continue;
            }
            if proposal.is_structural() && !structural_allowed {
                continue;
            }
            let duplicate = kept.iter().any(|k| {
                k.payload.target_slug == proposal.payload.target_slug
                    && k.payload.field == proposal.payload.field
                    && k.payload.action == proposal.payload.action
                    && k.payload.value == proposal.payload.value
            });
            if !duplicate {
                kept.push(proposal);
            }
        }

        kept.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then(b.expected_impact_score.total_cmp(&a.expected_impact_score))
        });
        kept.truncate(self.config.max_proposals);
        kept
    }
}

fn alert_confidence(count: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    0.45f64.mul_add(count / (count + 10.0), 0.5)
}

fn impact(count: u64, processed: u64) -> f64 {
    if processed == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let share = count as f64 / processed as f64;
    share.min(1.0)
}

/// First non-blank sample term the rule list does not already hold.
fn fresh_term<'a>(samples: &'a [String], existing: Option<&[String]>) -> Option<&'a String> {
    samples.iter().find(|t| {
        !t.trim().is_empty()
            && !existing.is_some_and(|list| list.iter().any(|e| e.eq_ignore_ascii_case(t)))
    })
}

fn keyword_candidates(ctx: &ProposalContext<'_>) -> Vec<Proposal> {
    let mut alerts = ctx.stats.top_confusion_alerts.clone();
    alerts.sort_by(|a, b| b.count.cmp(&a.count));

    let mut out = Vec::new();
    for alert in &alerts {
        let confidence = alert_confidence(alert.count);
        let expected_impact = impact(alert.count, ctx.stats.unique_products_processed);
        let predicted = ctx.rules.rule(&alert.predicted_slug);
        let expected = ctx.rules.rule(&alert.expected_slug);

        let exclude_term = fresh_term(
            &alert.sample_terms,
            predicted.map(|r| r.exclude_terms.as_slice()),
        );
        if let Some(term) = exclude_term {
            out.push(keyword_proposal(
                ctx,
                &alert.predicted_slug,
                RuleField::ExcludeTerms,
                term,
                format!(
                    "'{term}' pulled {} products from {} into {}",
                    alert.count, alert.expected_slug, alert.predicted_slug
                ),
                confidence,
                expected_impact,
            ));
        }

        let include_term = fresh_term(
            &alert.sample_terms,
            expected.map(|r| r.include_terms.as_slice()),
        );
        if let Some(term) = include_term {
            out.push(keyword_proposal(
                ctx,
                &alert.expected_slug,
                RuleField::IncludeTerms,
                term,
                format!("'{term}' should anchor products in {}", alert.expected_slug),
                confidence - 0.1,
                expected_impact / 2.0,
            ));
        }
    }
    out
}

fn keyword_proposal(
    ctx: &ProposalContext<'_>,
    slug: &str,
    field: RuleField,
    term: &str,
    reason: String,
    confidence: f64,
    expected_impact: f64,
) -> Proposal {
    Proposal::new(
        ProposalKind::KeywordPatch,
        ProposalPayload {
            target_slug: slug.to_string(),
            field: field.as_str().to_string(),
            action: PatchAction::Add,
            value: json!(term.trim().to_lowercase()),
            reason,
        },
        "confusion_alert",
    )
    .with_scope(ctx.batch_id, ctx.run_id)
    .with_scores(confidence, expected_impact)
}

/// Category most affected by the run: the expected side of the largest
/// confusion alert, else the first rule in the document.
fn focus_slug(ctx: &ProposalContext<'_>) -> Option<String> {
    ctx.stats
        .top_confusion_alerts
        .iter()
        .max_by_key(|a| a.count)
        .map(|a| a.expected_slug.clone())
        .or_else(|| ctx.rules.categories.keys().next().cloned())
}

fn metric_candidates(ctx: &ProposalContext<'_>) -> Vec<Proposal> {
    let Some(slug) = focus_slug(ctx) else {
        return Vec::new();
    };
    let rule = ctx.rules.rule(&slug).cloned().unwrap_or_default();
    let has = |metric: &str| ctx.failed_metrics.iter().any(|m| m == metric);
    let mut out = Vec::new();

    if has(AUTO_ACCEPTED_RATE) || has(CANARY_AUTO_ACCEPTED_RATE) || has(NEEDS_REVIEW_RATE) {
        let current = rule.auto_accept_threshold.unwrap_or(DEFAULT_AUTO_ACCEPT_THRESHOLD);
        let next = round2((current - THRESHOLD_STEP).max(AUTO_ACCEPT_FLOOR));
        if next < current {
            out.push(threshold_proposal(
                ctx,
                &slug,
                RuleField::AutoAcceptThreshold,
                next,
                format!("auto-accept threshold {current:.2} leaves too many products unaccepted"),
                0.62,
            ));
        }
    }

    if has(FALLBACK_CATEGORY_RATE) {
        let current = rule.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);
        let next = round2((current - THRESHOLD_STEP).max(MIN_CONFIDENCE_FLOOR));
        if next < current {
            out.push(threshold_proposal(
                ctx,
                &slug,
                RuleField::MinConfidence,
                next,
                format!(
                    "min confidence {current:.2} sends too many products to the fallback category"
                ),
                0.60,
            ));
        }
    }

    if has(ATTRIBUTE_VALIDATION_FAIL_RATE) {
        if let Some(attribute) = rule.required_attributes.last() {
            out.push(
                Proposal::new(
                    ProposalKind::SchemaPatch,
                    ProposalPayload {
                        target_slug: slug.clone(),
                        field: RuleField::RequiredAttributes.as_str().to_string(),
                        action: PatchAction::Remove,
                        value: json!(attribute),
                        reason: format!(
                            "required attribute '{attribute}' fails validation too often"
                        ),
                    },
                    "failed_metric",
                )
                .with_scope(ctx.batch_id, ctx.run_id)
                .with_scores(0.66, 0.2),
            );
        }
    }

    out
}

fn threshold_proposal(
    ctx: &ProposalContext<'_>,
    slug: &str,
    field: RuleField,
    value: f64,
    reason: String,
    confidence: f64,
) -> Proposal {
    Proposal::new(
        ProposalKind::ThresholdPatch,
        ProposalPayload {
            target_slug: slug.to_string(),
            field: field.as_str().to_string(),
            action: PatchAction::Set,
            value: json!(value),
            reason,
        },
        "failed_metric",
    )
    .with_scope(ctx.batch_id, ctx.run_id)
    .with_scores(confidence, 0.1)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
