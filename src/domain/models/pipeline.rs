//! Types exchanged with the categorization pipeline and the canary subset
//! builder. The pipeline itself is an external collaborator; the loop only
//! sees its run id, its artifacts and the statistics it persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Artifact kind naming the confusion hotlist a canary run must produce.
pub const CONFUSION_HOTLIST: &str = "confusion_hotlist";

/// Request to run the pipeline once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunRequest {
    pub input_path: PathBuf,
    pub store_id: String,
    pub run_label: String,
}

/// File produced by a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub kind: String,
    pub path: PathBuf,
}

/// What the pipeline returns directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunOutput {
    pub run_id: String,
    #[serde(default)]
    pub artifacts: Vec<RunArtifact>,
}

impl PipelineRunOutput {
    pub fn artifact(&self, kind: &str) -> Option<&RunArtifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}

/// A category pair the pipeline frequently confused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionAlert {
    pub expected_slug: String,
    pub predicted_slug: String,
    pub count: u64,
    /// Terms seen in the confused product titles, most frequent first.
    #[serde(default)]
    pub sample_terms: Vec<String>,
}

/// Quality-gate flags the pipeline computes itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineQualityGate {
    pub pre_qa_passed: bool,
}

/// Accuracy per category-tree level, when the run had labelled data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LevelAccuracy {
    pub l1: Option<f64>,
    pub l2: Option<f64>,
    pub l3: Option<f64>,
}

/// Statistics a pipeline run persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunStats {
    pub auto_accepted_rate: f64,
    pub fallback_category_rate: f64,
    pub needs_review_rate: f64,
    pub attribute_validation_fail_count: u64,
    pub unique_products_processed: u64,
    pub top_confusion_alerts: Vec<ConfusionAlert>,
    pub quality_gate: PipelineQualityGate,
    pub level_accuracy: LevelAccuracy,
}

impl RunStats {
    pub fn attribute_validation_fail_rate(&self) -> f64 {
        if self.unique_products_processed == 0 {
            return 0.0;
        }
        self.attribute_validation_fail_count as f64 / self.unique_products_processed as f64
    }

    /// Total products involved in confusion alerts.
    pub fn hard_case_count(&self) -> u64 {
        self.top_confusion_alerts.iter().map(|a| a.count).sum()
    }
}

/// Outcome status of a recorded pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    #[default]
    Completed,
    Failed,
}

impl PipelineRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A pipeline run as stored for later gate and harness queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunRecord {
    pub run_id: String,
    pub store_id: String,
    pub run_label: String,
    pub status: PipelineRunStatus,
    pub stats: RunStats,
    pub artifacts: Vec<RunArtifact>,
    pub created_at: DateTime<Utc>,
}

/// Input to the canary subset builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanarySubsetRequest {
    pub input_path: PathBuf,
    pub sample_size: usize,
    /// Share of the sample reserved for hotlist-matching (fixed) rows.
    pub fixed_ratio: f64,
    pub random_seed: u64,
    pub hotlist: Option<PathBuf>,
}

/// Pointer to the hotlist the next canary subset is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryState {
    pub store_id: String,
    pub run_id: String,
    pub hotlist_path: PathBuf,
    pub updated_at: DateTime<Utc>,
}
