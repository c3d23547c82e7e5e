//! Apply-mode decision.

use crate::domain::models::{
    ApplyMode, AutoApplyPolicy, CanaryConfig, LoopType, QualityGateResult,
};

/// Inputs the decision depends on. Kept free of I/O so it can be tested as a
/// table.
#[derive(Debug, Clone, Copy)]
pub struct ApplyInputs<'a> {
    pub loop_type: LoopType,
    pub policy: AutoApplyPolicy,
    pub gate: &'a QualityGateResult,
    pub auto_accepted_rate: f64,
    pub harness_passed: bool,
    pub degrade_mode: bool,
    /// Any generated proposal failed payload validation at high severity.
    pub has_high_severity_violation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyDecision {
    pub mode: ApplyMode,
    /// Structural proposals that may be applied under this decision.
    pub structural_cap: u32,
}

impl ApplyDecision {
    pub const NONE: Self = Self {
        mode: ApplyMode::None,
        structural_cap: 0,
    };
}

pub fn decide_apply_mode(
    inputs: &ApplyInputs<'_>,
    canary: &CanaryConfig,
    max_structural_applies: u32,
) -> ApplyDecision {
    if inputs.policy == AutoApplyPolicy::Never || !inputs.harness_passed {
        return ApplyDecision::NONE;
    }

    let full = ApplyDecision {
        mode: ApplyMode::Full,
        structural_cap: max_structural_applies,
    };
    let decision = match inputs.loop_type {
        LoopType::Full if inputs.gate.passed => full,
        LoopType::Full => ApplyDecision::NONE,
        LoopType::Canary => {
            let rate = inputs.auto_accepted_rate;
            if rate >= canary.full_apply_threshold && inputs.gate.passed {
                full
            } else if rate >= canary.partial_apply_threshold
                && inputs.gate.base_passed
                && !inputs.has_high_severity_violation
            {
                ApplyDecision {
                    mode: ApplyMode::PartialLowRisk,
                    structural_cap: 0,
                }
            } else {
                ApplyDecision::NONE
            }
        }
    };

    if inputs.degrade_mode {
        ApplyDecision {
            structural_cap: 0,
            ..decision
        }
    } else {
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARTIAL: ApplyDecision = ApplyDecision {
        mode: ApplyMode::PartialLowRisk,
        structural_cap: 0,
    };

    fn gate(passed: bool, base_passed: bool) -> QualityGateResult {
        QualityGateResult {
            passed,
            base_passed,
            ..QualityGateResult::default()
        }
    }

    fn inputs(loop_type: LoopType, rate: f64, gate: &QualityGateResult) -> ApplyInputs<'_> {
        ApplyInputs {
            loop_type,
            policy: AutoApplyPolicy::IfGatePasses,
            gate,
            auto_accepted_rate: rate,
            harness_passed: true,
            degrade_mode: false,
            has_high_severity_violation: false,
        }
    }

    fn decide(
        loop_type: LoopType,
        rate: f64,
        gate: &QualityGateResult,
        harness_passed: bool,
    ) -> ApplyDecision {
        let inputs = ApplyInputs {
            harness_passed,
            ..inputs(loop_type, rate, gate)
        };
        decide_apply_mode(&inputs, &CanaryConfig::default(), 2)
    }

    #[test]
    fn test_canary_table() {
        let passed = gate(true, true);
        let base_only = gate(false, true);

        assert_eq!(
            decide(LoopType::Canary, 0.90, &passed, true),
            ApplyDecision {
                mode: ApplyMode::Full,
                structural_cap: 2
            }
        );
        assert_eq!(decide(LoopType::Canary, 0.80, &base_only, true), PARTIAL);
        assert_eq!(
            decide(LoopType::Canary, 0.60, &base_only, true),
            ApplyDecision::NONE
        );
        assert_eq!(
            decide(LoopType::Canary, 0.90, &passed, false),
            ApplyDecision::NONE
        );
        assert_eq!(
            decide(LoopType::Canary, 0.80, &gate(false, false), true),
            ApplyDecision::NONE
        );

        let violating = ApplyInputs {
            has_high_severity_violation: true,
            ..inputs(LoopType::Canary, 0.80, &base_only)
        };
        assert_eq!(
            decide_apply_mode(&violating, &CanaryConfig::default(), 2),
            ApplyDecision::NONE
        );
    }

    #[test]
    fn test_violation_does_not_block_full_apply() {
        let passed = gate(true, true);
        let violating = ApplyInputs {
            has_high_severity_violation: true,
            ..inputs(LoopType::Canary, 0.90, &passed)
        };
        assert_eq!(
            decide_apply_mode(&violating, &CanaryConfig::default(), 2).mode,
            ApplyMode::Full
        );
    }

    #[test]
    fn test_full_loop_follows_gate() {
        assert_eq!(
            decide(LoopType::Full, 0.6, &gate(true, true), true).mode,
            ApplyMode::Full
        );
        assert_eq!(
            decide(LoopType::Full, 0.6, &gate(false, false), true),
            ApplyDecision::NONE
        );
    }

    #[test]
    fn test_never_policy_and_degrade_mode() {
        let passed = gate(true, true);
        let mut inputs = ApplyInputs {
            policy: AutoApplyPolicy::Never,
            ..inputs(LoopType::Canary, 0.95, &passed)
        };
        assert_eq!(
            decide_apply_mode(&inputs, &CanaryConfig::default(), 1),
            ApplyDecision::NONE
        );

        inputs.policy = AutoApplyPolicy::IfGatePasses;
        inputs.degrade_mode = true;
        assert_eq!(
            decide_apply_mode(&inputs, &CanaryConfig::default(), 1),
            ApplyDecision {
                mode: ApplyMode::Full,
                structural_cap: 0
            }
        );
    }
}
