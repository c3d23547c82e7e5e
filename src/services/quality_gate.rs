//! Quality gate over persisted run statistics.

use std::collections::BTreeMap;

use crate::domain::models::{CanaryConfig, LoopType, QualityGateConfig, QualityGateResult, RunStats};

pub const AUTO_ACCEPTED_RATE: &str = "auto_accepted_rate";
pub const FALLBACK_CATEGORY_RATE: &str = "fallback_category_rate";
pub const NEEDS_REVIEW_RATE: &str = "needs_review_rate";
pub const ATTRIBUTE_VALIDATION_FAIL_RATE: &str = "attribute_validation_fail_rate";
pub const PRE_QA_PASSED: &str = "pre_qa_passed";
pub const CANARY_AUTO_ACCEPTED_RATE: &str = "canary_auto_accepted_rate";

/// Checks a run's statistics against configured thresholds.
///
/// Canary loops add a stricter auto-accept check on top of the base checks;
/// `base_passed` reports the outcome without it.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityGateConfig,
    canary_auto_accept_threshold: f64,
}

impl QualityGate {
    pub fn new(config: QualityGateConfig, canary: &CanaryConfig) -> Self {
        Self { config, canary_auto_accept_threshold: canary.auto_accept_threshold }
    }

    pub fn evaluate(&self, stats: &RunStats, loop_type: LoopType) -> QualityGateResult {
        let mut failed_metrics = Vec::new();
        let mut metrics = BTreeMap::new();
        let attribute_fail_rate = stats.attribute_validation_fail_rate();

        metrics.insert(AUTO_ACCEPTED_RATE.to_string(), stats.auto_accepted_rate);
        metrics.insert(FALLBACK_CATEGORY_RATE.to_string(), stats.fallback_category_rate);
        metrics.insert(NEEDS_REVIEW_RATE.to_string(), stats.needs_review_rate);
        metrics.insert(ATTRIBUTE_VALIDATION_FAIL_RATE.to_string(), attribute_fail_rate);
        let pre_qa = if stats.quality_gate.pre_qa_passed { 1.0 } else { 0.0 };
        metrics.insert(PRE_QA_PASSED.to_string(), pre_qa);

        if stats.auto_accepted_rate < self.config.min_auto_accepted_rate {
            failed_metrics.push(AUTO_ACCEPTED_RATE.to_string());
        }
        if stats.fallback_category_rate > self.config.max_fallback_rate {
            failed_metrics.push(FALLBACK_CATEGORY_RATE.to_string());
        }
        if stats.needs_review_rate > self.config.max_needs_review_rate {
            failed_metrics.push(NEEDS_REVIEW_RATE.to_string());
        }
        if attribute_fail_rate > self.config.max_attribute_validation_fail_rate {
            failed_metrics.push(ATTRIBUTE_VALIDATION_FAIL_RATE.to_string());
        }
        if self.config.require_pre_qa_pass && !stats.quality_gate.pre_qa_passed {
            failed_metrics.push(PRE_QA_PASSED.to_string());
        }

        let base_passed = failed_metrics.is_empty();

        if loop_type == LoopType::Canary {
            metrics.insert(CANARY_AUTO_ACCEPTED_RATE.to_string(), stats.auto_accepted_rate);
            if stats.auto_accepted_rate < self.canary_auto_accept_threshold {
                failed_metrics.push(CANARY_AUTO_ACCEPTED_RATE.to_string());
            }
        }

        QualityGateResult {
            passed: failed_metrics.is_empty(),
            base_passed,
            failed_metrics,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PipelineQualityGate;

    fn gate() -> QualityGate {
        QualityGate::new(QualityGateConfig::default(), &CanaryConfig::default())
    }

    fn stats(auto_accepted_rate: f64) -> RunStats {
        RunStats {
            auto_accepted_rate,
            fallback_category_rate: 0.05,
            needs_review_rate: 0.2,
            unique_products_processed: 100,
            attribute_validation_fail_count: 3,
            quality_gate: PipelineQualityGate { pre_qa_passed: true },
            ..RunStats::default()
        }
    }

    #[test]
    fn test_full_loop_uses_base_checks_only() {
        let result = gate().evaluate(&stats(0.60), LoopType::Full);
        assert!(result.passed);
        assert!(result.base_passed);
        assert!(!result.metrics.contains_key(CANARY_AUTO_ACCEPTED_RATE));
    }

    #[test]
    fn test_canary_adds_strict_auto_accept_check() {
        let result = gate().evaluate(&stats(0.60), LoopType::Canary);
        assert!(!result.passed);
        assert!(result.base_passed);
        assert_eq!(result.failed_metrics, vec![CANARY_AUTO_ACCEPTED_RATE]);

        assert!(gate().evaluate(&stats(0.85), LoopType::Canary).passed);
    }

    #[test]
    fn test_each_base_check_reports_its_metric() {
        let mut s = stats(0.40);
        s.fallback_category_rate = 0.5;
        s.needs_review_rate = 0.9;
        s.attribute_validation_fail_count = 50;
        s.quality_gate.pre_qa_passed = false;

        let result = gate().evaluate(&s, LoopType::Full);
        assert!(!result.base_passed);
        assert_eq!(
            result.failed_metrics,
            vec![
                AUTO_ACCEPTED_RATE,
                FALLBACK_CATEGORY_RATE,
                NEEDS_REVIEW_RATE,
                ATTRIBUTE_VALIDATION_FAIL_RATE,
                PRE_QA_PASSED
            ]
        );
    }
}
