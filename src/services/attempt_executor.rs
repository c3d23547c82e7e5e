//! One attempt of one sequence: run the pipeline, gate it, learn from it.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    infer_failed_metrics, ApplyMode, Batch, CanaryConfig, CanaryState, CanarySubsetRequest, Config,
    LearningResult, LoopType, PipelineRunOutput, PipelineRunRequest, ProposalStatus,
    QualityGateResult, RollbackScope, SelfCorrectionContext, CONFUSION_HOTLIST,
};
use crate::domain::ports::{
    AppliedChangeRepository, BenchmarkRepository, CanarySubsetBuilder, PipelineRunner,
    ProposalRepository, RulesRepository, RunStatsRepository,
};
use crate::services::apply_policy::{decide_apply_mode, ApplyInputs};
use crate::services::harness::HarnessEvaluator;
use crate::services::proposal_generator::{ProposalContext, ProposalGenerator};
use crate::services::quality_gate::QualityGate;
use crate::services::rule_patcher::{RulePatchApplier, HARNESS_DEGRADE_REASON};

/// What one attempt produced. Gate and harness rejections are reported here
/// as values; only runtime failures surface as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub run_id: String,
    pub passed: bool,
    pub retryable_failure: bool,
    pub quality_gate: QualityGateResult,
    pub harness_passed: bool,
    pub failed_metrics: Vec<String>,
    pub correction_context: Option<SelfCorrectionContext>,
    pub harness_delta: Option<f64>,
    pub learning_result: LearningResult,
    /// Set when applying stopped on an error; the attempt counts as failed.
    pub error: Option<String>,
}

/// Executes attempts on behalf of the orchestrator.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    async fn execute(
        &self,
        batch: &Batch,
        sequence_no: u32,
        attempt_no: u32,
        carried: Option<&SelfCorrectionContext>,
    ) -> DomainResult<AttemptOutcome>;
}

/// Ports the executor drives.
#[derive(Clone)]
pub struct ExecutorPorts {
    pub pipeline: Arc<dyn PipelineRunner>,
    pub subsets: Arc<dyn CanarySubsetBuilder>,
    pub run_stats: Arc<dyn RunStatsRepository>,
    pub proposals: Arc<dyn ProposalRepository>,
    pub benchmarks: Arc<dyn BenchmarkRepository>,
    pub rules: Arc<dyn RulesRepository>,
    pub changes: Arc<dyn AppliedChangeRepository>,
}

pub struct AttemptExecutor {
    pipeline: Arc<dyn PipelineRunner>,
    subsets: Arc<dyn CanarySubsetBuilder>,
    run_stats: Arc<dyn RunStatsRepository>,
    proposals: Arc<dyn ProposalRepository>,
    rules: Arc<dyn RulesRepository>,
    gate: QualityGate,
    generator: ProposalGenerator,
    harness: HarnessEvaluator,
    applier: RulePatchApplier,
    input_path: PathBuf,
    store_id: String,
    canary: CanaryConfig,
    max_structural_applies: u32,
}

impl AttemptExecutor {
    pub fn new(ports: ExecutorPorts, config: &Config) -> Self {
        Self {
            gate: QualityGate::new(config.quality_gate.clone(), &config.canary),
            generator: ProposalGenerator::new(config.proposals.clone()),
            harness: HarnessEvaluator::new(
                ports.benchmarks,
                ports.run_stats.clone(),
                config.harness.clone(),
            ),
            applier: RulePatchApplier::new(ports.rules.clone(), ports.changes),
            pipeline: ports.pipeline,
            subsets: ports.subsets,
            run_stats: ports.run_stats,
            proposals: ports.proposals,
            rules: ports.rules,
            input_path: PathBuf::from(&config.pipeline.input_path),
            store_id: config.pipeline.store_id.clone(),
            canary: config.canary.clone(),
            max_structural_applies: config.proposals.max_structural_applies,
        }
    }

    async fn run_full(&self) -> DomainResult<PipelineRunOutput> {
        self.pipeline
            .run(&PipelineRunRequest {
                input_path: self.input_path.clone(),
                store_id: self.store_id.clone(),
                run_label: LoopType::Full.as_str().to_string(),
            })
            .await
    }

    /// Build the subset from the previous hotlist, run it, and point the
    /// canary state at the hotlist this run produced.
    async fn run_canary(&self) -> DomainResult<PipelineRunOutput> {
        let previous = self.run_stats.get_canary_state(&self.store_id).await?;
        let subset_path = self
            .subsets
            .build(&CanarySubsetRequest {
                input_path: self.input_path.clone(),
                sample_size: self.canary.sample_size,
                fixed_ratio: self.canary.fixed_ratio,
                random_seed: self.canary.random_seed,
                hotlist: previous.map(|s| s.hotlist_path),
            })
            .await?;

        let output = self
            .pipeline
            .run(&PipelineRunRequest {
                input_path: subset_path,
                store_id: self.store_id.clone(),
                run_label: LoopType::Canary.as_str().to_string(),
            })
            .await?;

        let hotlist =
            output
                .artifact(CONFUSION_HOTLIST)
                .ok_or_else(|| DomainError::MissingArtifact {
                    run_id: output.run_id.clone(),
                    kind: CONFUSION_HOTLIST.to_string(),
                })?;
        self.run_stats
            .set_canary_state(&CanaryState {
                store_id: self.store_id.clone(),
                run_id: output.run_id.clone(),
                hotlist_path: hotlist.path.clone(),
                updated_at: Utc::now(),
            })
            .await?;
        Ok(output)
    }
}

fn merge_metrics(into: &mut Vec<String>, from: &[String]) {
    for metric in from {
        if !into.contains(metric) {
            into.push(metric.clone());
        }
    }
}

#[async_trait]
impl AttemptRunner for AttemptExecutor {
    #[instrument(
        skip(self, batch, carried),
        fields(batch_id = %batch.id, loop_type = %batch.loop_type),
        err
    )]
    async fn execute(
        &self,
        batch: &Batch,
        sequence_no: u32,
        attempt_no: u32,
        carried: Option<&SelfCorrectionContext>,
    ) -> DomainResult<AttemptOutcome> {
        let degrade_mode = batch.loop_type == LoopType::Canary && attempt_no > 1;

        let output = match batch.loop_type {
            LoopType::Full => self.run_full().await?,
            LoopType::Canary => self.run_canary().await?,
        };
        let run_id = output.run_id;

        let stats = self.run_stats.get_stats(&run_id).await?;
        let quality_gate = self.gate.evaluate(&stats, batch.loop_type);

        let mut proposal_metrics = carried.map(|c| c.failed_metrics.clone()).unwrap_or_default();
        merge_metrics(&mut proposal_metrics, &quality_gate.failed_metrics);

        let rules = self.rules.read().await?;
        let generated = self.generator.generate(&ProposalContext {
            batch_id: batch.id,
            run_id: &run_id,
            stats: &stats,
            failed_metrics: &proposal_metrics,
            rules: &rules.document,
            degrade_mode,
        });

        let harness = self
            .harness
            .evaluate(Some(batch.id), &self.store_id, &run_id, None)
            .await?;

        let decision = decide_apply_mode(
            &ApplyInputs {
                loop_type: batch.loop_type,
                policy: batch.auto_apply_policy,
                gate: &quality_gate,
                auto_accepted_rate: stats.auto_accepted_rate,
                harness_passed: harness.passed,
                degrade_mode,
                has_high_severity_violation: generated
                    .iter()
                    .any(|p| p.payload.has_high_severity_violation()),
            },
            &self.canary,
            self.max_structural_applies,
        );

        let mut learning = LearningResult {
            apply_mode: decision.mode,
            degrade_mode,
            harness_passed: harness.passed,
            harness_failed_metrics: harness.failed_metrics.clone(),
            harness_delta: harness.harness_delta,
            ..LearningResult::default()
        };
        let mut apply_error = None;

        for proposal in &generated {
            self.proposals.insert(proposal).await?;
            learning.proposals_generated += 1;

            if proposal.payload.has_high_severity_violation() {
                self.proposals
                    .update_status(proposal.id, ProposalStatus::Rejected)
                    .await?;
                learning.proposals_rejected += 1;
                continue;
            }
            if decision.mode == ApplyMode::None || apply_error.is_some() {
                continue;
            }
            if proposal.is_structural() && learning.structural_applied >= decision.structural_cap {
                continue;
            }

            // Changes applied before a failure stay in this attempt's result.
            let change = match self.applier.apply(proposal, decision.mode).await {
                Ok(change) => change,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(proposal_id = %proposal.id, error = %e, "apply failed");
                    apply_error = Some(e.to_string());
                    continue;
                }
            };
            learning.proposals_applied += 1;
            if proposal.is_structural() {
                learning.structural_applied += 1;
            }
            learning.applied_change_ids.push(change.id);
        }

        // A failed harness forces apply mode none, so this run applied
        // nothing and the newest change in the batch came from an earlier run.
        if !harness.passed && self.harness.rollback_on_degrade() {
            let scope = RollbackScope::batch(batch.id);
            if let Some(event) = self
                .applier
                .rollback_latest(&scope, HARNESS_DEGRADE_REASON)
                .await?
            {
                learning.rolled_back_change_ids.push(event.applied_change_id);
            }
        }

        let passed = quality_gate.passed && harness.passed && apply_error.is_none();
        let mut failed_metrics = proposal_metrics;
        merge_metrics(&mut failed_metrics, &harness.failed_metrics);
        if let Some(message) = &apply_error {
            merge_metrics(&mut failed_metrics, &infer_failed_metrics(message));
        }

        let correction_context = (!passed).then(|| SelfCorrectionContext {
            error_message: apply_error.clone(),
            failed_metrics: failed_metrics.clone(),
            previous_run_id: Some(run_id.clone()),
            degrade_mode,
        });

        tracing::info!(
            sequence_no,
            attempt_no,
            run_id = %run_id,
            passed,
            applied = learning.proposals_applied,
            mode = decision.mode.as_str(),
            "attempt executed"
        );

        Ok(AttemptOutcome {
            run_id,
            passed,
            retryable_failure: !passed && !harness.has_non_retryable_failure(),
            harness_passed: harness.passed,
            harness_delta: harness.harness_delta,
            quality_gate,
            failed_metrics,
            correction_context,
            learning_result: learning,
            error: apply_error,
        })
    }
}
