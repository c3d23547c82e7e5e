//! Run attempt domain model.
//!
//! One attempt is one execution of a sequence. Attempts are keyed by
//! `(batch_id, sequence_no, attempt_no)` and written with idempotent upserts,
//! so a restarted worker can replay them safely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Status of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    #[default]
    Queued,
    Running,
    /// Passed on the first attempt.
    Succeeded,
    /// Passed after at least one failed attempt.
    RetriedSucceeded,
    /// Failed; terminal on attempt 1 unless the sequence continues.
    Failed,
    /// Failed after at least one retry. Always terminal.
    RetriedFailed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::RetriedSucceeded => "retried_succeeded",
            Self::Failed => "failed",
            Self::RetriedFailed => "retried_failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "retried_succeeded" => Some(Self::RetriedSucceeded),
            "failed" => Some(Self::Failed),
            "retried_failed" => Some(Self::RetriedFailed),
            _ => None,
        }
    }

    /// Statuses written by `finalize_run_attempt`.
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::RetriedSucceeded)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How proposals were applied by an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    #[default]
    None,
    /// Only non-structural proposals; structural cap forced to zero.
    PartialLowRisk,
    Full,
}

impl ApplyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PartialLowRisk => "partial_low_risk",
            Self::Full => "full",
        }
    }
}

/// Correction context carried into the next attempt of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SelfCorrectionContext {
    /// Set only for runtime failures. A pure gate failure leaves this empty.
    pub error_message: Option<String>,
    pub failed_metrics: Vec<String>,
    pub previous_run_id: Option<String>,
    pub degrade_mode: bool,
}

impl SelfCorrectionContext {
    /// Build a context from a runtime error, inferring the metrics it hit.
    pub fn from_error(message: impl Into<String>, carried: &[String]) -> Self {
        let message = message.into();
        let mut failed_metrics = carried.to_vec();
        for metric in infer_failed_metrics(&message) {
            if !failed_metrics.contains(&metric) {
                failed_metrics.push(metric);
            }
        }
        Self {
            error_message: Some(message),
            failed_metrics,
            previous_run_id: None,
            degrade_mode: false,
        }
    }
}

/// Map a runtime error message onto the metric names the loop understands.
pub fn infer_failed_metrics(message: &str) -> Vec<String> {
    let lower = message.to_lowercase();
    let mut metrics = Vec::new();
    if lower.contains("timeout") || lower.contains("timed out") {
        metrics.push("pipeline_timeout".to_string());
    }
    if lower.contains("hotlist") || lower.contains("artifact") {
        metrics.push("canary_artifact_missing".to_string());
    }
    if lower.contains("database") || lower.contains("sqlite") {
        metrics.push("persistence_error".to_string());
    }
    if lower.contains("rules") {
        metrics.push("rules_storage_error".to_string());
    }
    if metrics.is_empty() {
        metrics.push("runtime_error".to_string());
    }
    metrics
}

/// Output of the quality gate for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QualityGateResult {
    pub passed: bool,
    /// Gate outcome ignoring the strict canary auto-accept sub-check.
    pub base_passed: bool,
    pub failed_metrics: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

/// What an attempt learned and changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LearningResult {
    pub proposals_generated: u32,
    pub proposals_rejected: u32,
    pub proposals_applied: u32,
    pub structural_applied: u32,
    pub apply_mode: ApplyMode,
    pub degrade_mode: bool,
    pub harness_passed: bool,
    pub harness_failed_metrics: Vec<String>,
    pub harness_delta: Option<f64>,
    pub applied_change_ids: Vec<Uuid>,
    pub rolled_back_change_ids: Vec<Uuid>,
}

/// One execution of a batch sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAttempt {
    pub batch_id: Uuid,
    pub sequence_no: u32,
    pub attempt_no: u32,
    pub status: AttemptStatus,
    pub pipeline_run_id: Option<String>,
    pub error: Option<String>,
    pub self_correction_context: Option<SelfCorrectionContext>,
    pub gate_result: Option<QualityGateResult>,
    pub learning_result: Option<LearningResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunAttempt {
    /// A freshly started attempt.
    pub fn running(batch_id: Uuid, sequence_no: u32, attempt_no: u32) -> Self {
        Self {
            batch_id,
            sequence_no,
            attempt_no,
            status: AttemptStatus::Running,
            pipeline_run_id: None,
            error: None,
            self_correction_context: None,
            gate_result: None,
            learning_result: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    /// Failed without an error message: the run completed but the metrics
    /// did not clear the bar.
    pub fn is_pure_gate_failure(&self) -> bool {
        self.status == AttemptStatus::Failed
            && self.error.as_deref().map_or(true, |e| e.trim().is_empty())
    }

    /// Failed metrics recorded by this attempt, from the gate and from any
    /// correction context.
    pub fn recorded_failed_metrics(&self) -> Vec<String> {
        let mut metrics: Vec<String> = Vec::new();
        let sources = self
            .gate_result
            .iter()
            .flat_map(|g| g.failed_metrics.iter())
            .chain(
                self.self_correction_context
                    .iter()
                    .flat_map(|c| c.failed_metrics.iter()),
            )
            .chain(
                self.learning_result
                    .iter()
                    .flat_map(|l| l.harness_failed_metrics.iter()),
            );
        for metric in sources {
            if !metrics.contains(metric) {
                metrics.push(metric.clone());
            }
        }
        metrics
    }
}
