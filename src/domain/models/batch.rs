//! Batch domain model.
//!
//! A batch is a requested set of N sequential self-improvement loops. It is
//! claimed by exactly one worker, which walks its sequences in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of loop a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    /// Runs the categorization pipeline on the whole catalog.
    Full,
    /// Runs it on a small deterministic subset, behind a stricter gate.
    Canary,
}

impl LoopType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Canary => "canary",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" => Some(Self::Full),
            "canary" => Some(Self::Canary),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoopType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Queued,
    Running,
    Completed,
    CompletedWithFailures,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithFailures => "completed_with_failures",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "completed_with_failures" => Some(Self::CompletedWithFailures),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithFailures | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the executor may apply proposals without a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoApplyPolicy {
    /// Proposals are stored but never applied automatically.
    Never,
    /// Apply when the quality gate and the harness both allow it.
    #[default]
    IfGatePasses,
}

impl AutoApplyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::IfGatePasses => "if_gate_passes",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "never" | "off" => Some(Self::Never),
            "if_gate_passes" => Some(Self::IfGatePasses),
            _ => None,
        }
    }
}

/// Failure recorded when a worker aborts a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Aggregated counters for a batch, rebuilt from attempts on every claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BatchSummary {
    pub completed_loops: u32,
    pub success_count: u32,
    pub retried_success_count: u32,
    pub final_failed_count: u32,
    pub gate_pass_rate: f64,
    pub proposals_generated: u32,
    pub proposals_applied: u32,
    pub structural_applies: u32,
    pub rollbacks: u32,
    pub avg_harness_delta: f64,
    pub harness_delta_samples: u32,
    pub running_sequence: Option<u32>,
    pub last_run_id: Option<String>,
    pub worker_failure: Option<WorkerFailure>,
    pub recovery_reason: Option<String>,
}

/// A requested set of self-improvement loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub requested_count: u32,
    pub loop_type: LoopType,
    pub status: BatchStatus,
    pub max_loops_cap: u32,
    pub retry_limit: u32,
    pub auto_apply_policy: AutoApplyPolicy,
    pub summary: BatchSummary,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Create a new queued batch.
    pub fn new(requested_count: u32, loop_type: LoopType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requested_count,
            loop_type,
            status: BatchStatus::Queued,
            max_loops_cap: requested_count,
            retry_limit: 1,
            auto_apply_policy: AutoApplyPolicy::default(),
            summary: BatchSummary::default(),
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_max_loops_cap(mut self, cap: u32) -> Self {
        self.max_loops_cap = cap;
        self
    }

    pub fn with_auto_apply_policy(mut self, policy: AutoApplyPolicy) -> Self {
        self.auto_apply_policy = policy;
        self
    }

    /// Highest attempt number any sequence of this batch may reach.
    pub fn max_attempts(&self) -> u32 {
        self.retry_limit + 1
    }

    /// Validate the batch against the configured cap before enqueueing.
    pub fn validate(&self, max_requested_count: u32) -> Result<(), String> {
        if self.requested_count == 0 {
            return Err("requested count must be at least 1".to_string());
        }
        if self.requested_count > max_requested_count {
            return Err(format!(
                "requested count {} exceeds max allowed {}",
                self.requested_count, max_requested_count
            ));
        }
        if self.requested_count > self.max_loops_cap {
            return Err(format!(
                "requested count {} exceeds max allowed loops cap {}",
                self.requested_count, self.max_loops_cap
            ));
        }
        Ok(())
    }
}
