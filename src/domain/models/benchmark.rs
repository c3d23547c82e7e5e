//! Benchmark snapshots and harness results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Frozen description of the evaluation set a harness run used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSnapshot {
    pub id: Uuid,
    pub store_id: String,
    /// How the snapshot was built, e.g. `qa_feedback+hard_cases`.
    pub source: String,
    pub row_count: u64,
    pub sample_size: u64,
    pub dataset_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Result of comparing a candidate run with its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HarnessEvalResult {
    pub passed: bool,
    pub metric_scores: BTreeMap<String, f64>,
    pub failed_metrics: Vec<String>,
    pub baseline_run_id: Option<String>,
    pub candidate_run_id: String,
    pub snapshot_id: Option<Uuid>,
    /// Mean of the comparable accuracy deltas, if any were comparable.
    pub harness_delta: Option<f64>,
}

impl HarnessEvalResult {
    /// Harness found the candidate worse than the baseline, as opposed to
    /// only lacking benchmark data.
    pub fn is_degraded(&self) -> bool {
        !self.passed
    }

    /// Failures retrying the same loop cannot fix.
    pub fn has_non_retryable_failure(&self) -> bool {
        self.failed_metrics.iter().any(|m| m == "benchmark_sample_size")
    }
}

/// Persisted harness evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessRun {
    pub id: Uuid,
    pub batch_id: Option<Uuid>,
    pub result: HarnessEvalResult,
    pub created_at: DateTime<Utc>,
}
