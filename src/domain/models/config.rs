use serde::{Deserialize, Serialize};

/// Main configuration structure for rulesmith
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Batch queue limits and worker cadence
    #[serde(default)]
    pub batch: BatchConfig,

    /// Pipeline runner configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Rules file location
    #[serde(default)]
    pub rules: RulesConfig,

    /// Canary subset and apply thresholds
    #[serde(default)]
    pub canary: CanaryConfig,

    /// Quality gate thresholds
    #[serde(default)]
    pub quality_gate: QualityGateConfig,

    /// Proposal generation limits
    #[serde(default)]
    pub proposals: ProposalConfig,

    /// Harness evaluation thresholds
    #[serde(default)]
    pub harness: HarnessConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".rulesmith/rulesmith.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated JSON log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Batch queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Largest loop count a single enqueue may request
    #[serde(default = "default_max_requested_count")]
    pub max_requested_count: u32,

    /// Retry limit stamped on new batches
    #[serde(default = "default_retry_limit")]
    pub default_retry_limit: u32,

    /// Hard cap on loops per batch
    #[serde(default = "default_max_loops_cap")]
    pub max_loops_cap: u32,

    /// Attempts running longer than this are considered crashed
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,

    /// Worker sleep between empty queue polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

const fn default_max_requested_count() -> u32 {
    10
}

const fn default_retry_limit() -> u32 {
    1
}

const fn default_max_loops_cap() -> u32 {
    25
}

const fn default_stale_after_minutes() -> i64 {
    90
}

const fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_requested_count: default_max_requested_count(),
            default_retry_limit: default_retry_limit(),
            max_loops_cap: default_max_loops_cap(),
            stale_after_minutes: default_stale_after_minutes(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Pipeline runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Normalized catalog CSV fed to full loops
    #[serde(default = "default_input_path")]
    pub input_path: String,

    /// Store whose catalog is categorized
    #[serde(default = "default_store_id")]
    pub store_id: String,

    /// Command (program followed by arguments) that runs the pipeline
    #[serde(default)]
    pub command: Vec<String>,

    /// Where canary subsets and run outputs are written
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// A pipeline run taking longer than this is killed and fails the attempt
    #[serde(default = "default_pipeline_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_input_path() -> String {
    "data/catalog.csv".to_string()
}

fn default_store_id() -> String {
    "default".to_string()
}

fn default_work_dir() -> String {
    ".rulesmith/work".to_string()
}

const fn default_pipeline_timeout_secs() -> u64 {
    1800
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            store_id: default_store_id(),
            command: vec![],
            work_dir: default_work_dir(),
            timeout_secs: default_pipeline_timeout_secs(),
        }
    }
}

/// Rules file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RulesConfig {
    /// Path to the JSON rules file the pipeline reads
    #[serde(default = "default_rules_path")]
    pub path: String,
}

fn default_rules_path() -> String {
    "rules/category_rules.json".to_string()
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self { path: default_rules_path() }
    }
}

/// Canary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CanaryConfig {
    #[serde(default = "default_canary_sample_size")]
    pub sample_size: usize,

    /// Share of the subset taken from hotlist-matching rows
    #[serde(default = "default_fixed_ratio")]
    pub fixed_ratio: f64,

    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Auto-accepted rate a canary run must reach to pass the gate
    #[serde(default = "default_canary_auto_accept_threshold")]
    pub auto_accept_threshold: f64,

    /// Rate at or above which a canary may apply everything
    #[serde(default = "default_full_apply_threshold")]
    pub full_apply_threshold: f64,

    /// Rate at or above which a canary may apply low-risk proposals
    #[serde(default = "default_partial_apply_threshold")]
    pub partial_apply_threshold: f64,
}

const fn default_canary_sample_size() -> usize {
    200
}

const fn default_fixed_ratio() -> f64 {
    0.3
}

const fn default_random_seed() -> u64 {
    42
}

const fn default_canary_auto_accept_threshold() -> f64 {
    0.75
}

const fn default_full_apply_threshold() -> f64 {
    0.85
}

const fn default_partial_apply_threshold() -> f64 {
    0.75
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            sample_size: default_canary_sample_size(),
            fixed_ratio: default_fixed_ratio(),
            random_seed: default_random_seed(),
            auto_accept_threshold: default_canary_auto_accept_threshold(),
            full_apply_threshold: default_full_apply_threshold(),
            partial_apply_threshold: default_partial_apply_threshold(),
        }
    }
}

/// Quality gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityGateConfig {
    #[serde(default = "default_min_auto_accepted_rate")]
    pub min_auto_accepted_rate: f64,

    #[serde(default = "default_max_fallback_rate")]
    pub max_fallback_rate: f64,

    #[serde(default = "default_max_needs_review_rate")]
    pub max_needs_review_rate: f64,

    #[serde(default = "default_max_attribute_fail_rate")]
    pub max_attribute_validation_fail_rate: f64,

    #[serde(default = "default_true")]
    pub require_pre_qa_pass: bool,
}

const fn default_min_auto_accepted_rate() -> f64 {
    0.55
}

const fn default_max_fallback_rate() -> f64 {
    0.10
}

const fn default_max_needs_review_rate() -> f64 {
    0.35
}

const fn default_max_attribute_fail_rate() -> f64 {
    0.15
}

const fn default_true() -> bool {
    true
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_auto_accepted_rate: default_min_auto_accepted_rate(),
            max_fallback_rate: default_max_fallback_rate(),
            max_needs_review_rate: default_max_needs_review_rate(),
            max_attribute_validation_fail_rate: default_max_attribute_fail_rate(),
            require_pre_qa_pass: default_true(),
        }
    }
}

/// Proposal generation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProposalConfig {
    #[serde(default = "default_max_proposals")]
    pub max_proposals: usize,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_true")]
    pub allow_structural: bool,

    /// Minimum confidence on a canary retry
    #[serde(default = "default_degrade_min_confidence")]
    pub degrade_min_confidence: f64,

    /// Structural proposals a full apply may commit per attempt
    #[serde(default = "default_max_structural_applies")]
    pub max_structural_applies: u32,
}

const fn default_max_proposals() -> usize {
    5
}

const fn default_min_confidence() -> f64 {
    0.55
}

const fn default_degrade_min_confidence() -> f64 {
    0.75
}

const fn default_max_structural_applies() -> u32 {
    1
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            max_proposals: default_max_proposals(),
            min_confidence: default_min_confidence(),
            allow_structural: default_true(),
            degrade_min_confidence: default_degrade_min_confidence(),
            max_structural_applies: default_max_structural_applies(),
        }
    }
}

/// Harness thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    #[serde(default = "default_min_benchmark_sample_size")]
    pub min_benchmark_sample_size: u64,

    #[serde(default = "default_harness_max_fallback_rate")]
    pub max_fallback_rate: f64,

    #[serde(default = "default_harness_max_needs_review_rate")]
    pub max_needs_review_rate: f64,

    /// Smallest allowed (candidate - baseline) accuracy change per level
    #[serde(default = "default_min_delta")]
    pub min_l1_delta: f64,

    #[serde(default = "default_min_delta")]
    pub min_l2_delta: f64,

    #[serde(default = "default_min_delta")]
    pub min_l3_delta: f64,

    /// Recent runs whose confusion alerts count as hard cases
    #[serde(default = "default_hard_case_window")]
    pub hard_case_window_runs: u32,

    #[serde(default = "default_true")]
    pub rollback_on_degrade: bool,
}

const fn default_min_benchmark_sample_size() -> u64 {
    50
}

const fn default_harness_max_fallback_rate() -> f64 {
    0.15
}

const fn default_harness_max_needs_review_rate() -> f64 {
    0.45
}

const fn default_min_delta() -> f64 {
    -0.02
}

const fn default_hard_case_window() -> u32 {
    5
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            min_benchmark_sample_size: default_min_benchmark_sample_size(),
            max_fallback_rate: default_harness_max_fallback_rate(),
            max_needs_review_rate: default_harness_max_needs_review_rate(),
            min_l1_delta: default_min_delta(),
            min_l2_delta: default_min_delta(),
            min_l3_delta: default_min_delta(),
            hard_case_window_runs: default_hard_case_window(),
            rollback_on_degrade: default_true(),
        }
    }
}
