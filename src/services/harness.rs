//! Harness evaluation of a candidate run against a baseline.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    BenchmarkSnapshot, HarnessConfig, HarnessEvalResult, HarnessRun, PipelineRunStatus, RunStats,
};
use crate::domain::ports::{BenchmarkRepository, RunStatsRepository};

pub const BENCHMARK_SAMPLE_SIZE: &str = "benchmark_sample_size";
pub const FALLBACK_CATEGORY_RATE: &str = "fallback_category_rate";
pub const NEEDS_REVIEW_RATE: &str = "needs_review_rate";
pub const L1_DELTA: &str = "l1_delta";
pub const L2_DELTA: &str = "l2_delta";
pub const L3_DELTA: &str = "l3_delta";

const SNAPSHOT_SOURCE: &str = "qa_feedback+hard_cases";

/// Compares candidate runs with a baseline on a benchmark snapshot.
pub struct HarnessEvaluator {
    benchmarks: Arc<dyn BenchmarkRepository>,
    run_stats: Arc<dyn RunStatsRepository>,
    config: HarnessConfig,
}

impl HarnessEvaluator {
    pub fn new(
        benchmarks: Arc<dyn BenchmarkRepository>,
        run_stats: Arc<dyn RunStatsRepository>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            benchmarks,
            run_stats,
            config,
        }
    }

    pub fn rollback_on_degrade(&self) -> bool {
        self.config.rollback_on_degrade
    }

    /// Reuse the latest snapshot when its inputs have not changed.
    async fn resolve_snapshot(&self, store_id: &str) -> DomainResult<BenchmarkSnapshot> {
        let qa_count = self.benchmarks.qa_feedback_count(store_id).await?;
        let recent = self.run_stats.recent_runs(store_id, self.config.hard_case_window_runs).await?;

        let mut hasher = Sha256::new();
        hasher.update(store_id.as_bytes());
        hasher.update(qa_count.to_le_bytes());
        let mut hard_cases = 0u64;
        let mut alert_rows = 0u64;
        for run in recent.iter().filter(|r| r.status == PipelineRunStatus::Completed) {
            for alert in &run.stats.top_confusion_alerts {
                hasher.update(alert.expected_slug.as_bytes());
                hasher.update(b"\x1f");
                hasher.update(alert.predicted_slug.as_bytes());
                hasher.update(alert.count.to_le_bytes());
                hard_cases += alert.count;
                alert_rows += 1;
            }
        }
        let dataset_hash = hex::encode(hasher.finalize());

        if let Some(latest) = self.benchmarks.latest_snapshot(store_id).await? {
            if latest.dataset_hash == dataset_hash {
                return Ok(latest);
            }
        }

        let snapshot = BenchmarkSnapshot {
            id: Uuid::new_v4(),
            store_id: store_id.to_string(),
            source: SNAPSHOT_SOURCE.to_string(),
            row_count: qa_count + alert_rows,
            sample_size: qa_count + hard_cases,
            dataset_hash,
            created_at: Utc::now(),
        };
        self.benchmarks.insert_snapshot(&snapshot).await?;
        tracing::debug!(store_id, sample_size = snapshot.sample_size, "new benchmark snapshot");
        Ok(snapshot)
    }

    /// Evaluate and persist one harness run.
    #[instrument(skip(self), err)]
    pub async fn evaluate(
        &self,
        batch_id: Option<Uuid>,
        store_id: &str,
        candidate_run_id: &str,
        baseline_run_id: Option<&str>,
    ) -> DomainResult<HarnessEvalResult> {
        let snapshot = self.resolve_snapshot(store_id).await?;
        let candidate = self.run_stats.get_stats(candidate_run_id).await?;

        let baseline_run_id = match baseline_run_id {
            Some(id) => Some(id.to_string()),
            None => self
                .run_stats
                .find_baseline(store_id, candidate_run_id)
                .await?
                .map(|r| r.run_id),
        };
        let baseline = match &baseline_run_id {
            Some(id) => Some(self.run_stats.get_stats(id).await?),
            None => None,
        };

        let result = self.score(
            &snapshot,
            candidate_run_id,
            &candidate,
            baseline_run_id,
            baseline.as_ref(),
        );

        self.benchmarks
            .record_harness_run(&HarnessRun {
                id: Uuid::new_v4(),
                batch_id,
                result: result.clone(),
                created_at: Utc::now(),
            })
            .await?;

        if result.passed {
            tracing::info!(
                candidate = candidate_run_id,
                delta = ?result.harness_delta,
                "harness passed"
            );
        } else {
            tracing::warn!(
                candidate = candidate_run_id,
                failed = ?result.failed_metrics,
                "harness failed"
            );
        }
        Ok(result)
    }

    fn score(
        &self,
        snapshot: &BenchmarkSnapshot,
        candidate_run_id: &str,
        candidate: &RunStats,
        baseline_run_id: Option<String>,
        baseline: Option<&RunStats>,
    ) -> HarnessEvalResult {
        let mut failed_metrics = Vec::new();
        let mut metric_scores = BTreeMap::new();

        #[allow(clippy::cast_precision_loss)]
        let sample_size = snapshot.sample_size as f64;
        metric_scores.insert(BENCHMARK_SAMPLE_SIZE.to_string(), sample_size);
        metric_scores.insert(FALLBACK_CATEGORY_RATE.to_string(), candidate.fallback_category_rate);
        metric_scores.insert(NEEDS_REVIEW_RATE.to_string(), candidate.needs_review_rate);

        if snapshot.sample_size < self.config.min_benchmark_sample_size {
            failed_metrics.push(BENCHMARK_SAMPLE_SIZE.to_string());
        }
        if candidate.fallback_category_rate > self.config.max_fallback_rate {
            failed_metrics.push(FALLBACK_CATEGORY_RATE.to_string());
        }
        if candidate.needs_review_rate > self.config.max_needs_review_rate {
            failed_metrics.push(NEEDS_REVIEW_RATE.to_string());
        }

        let base = baseline.map(|b| &b.level_accuracy);
        let levels = [
            (
                L1_DELTA,
                candidate.level_accuracy.l1,
                base.and_then(|b| b.l1),
                self.config.min_l1_delta,
            ),
            (
                L2_DELTA,
                candidate.level_accuracy.l2,
                base.and_then(|b| b.l2),
                self.config.min_l2_delta,
            ),
            (
                L3_DELTA,
                candidate.level_accuracy.l3,
                base.and_then(|b| b.l3),
                self.config.min_l3_delta,
            ),
        ];
        let mut deltas = Vec::new();
        for (name, cand, base, min_delta) in levels {
            let delta = match (cand, base) {
                (Some(c), Some(b)) => c - b,
                _ => {
                    metric_scores.insert(name.to_string(), 0.0);
                    continue;
                }
            };
            metric_scores.insert(name.to_string(), delta);
            deltas.push(delta);
            if delta < min_delta {
                failed_metrics.push(name.to_string());
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let harness_delta =
            (!deltas.is_empty()).then(|| deltas.iter().sum::<f64>() / deltas.len() as f64);

        HarnessEvalResult {
            passed: failed_metrics.is_empty(),
            metric_scores,
            failed_metrics,
            baseline_run_id,
            candidate_run_id: candidate_run_id.to_string(),
            snapshot_id: Some(snapshot.id),
            harness_delta,
        }
    }
}
