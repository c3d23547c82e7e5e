//! Common test utilities for integration tests
//!
//! Provides a scripted pipeline runner and a `TestEnv` that wires real SQLite
//! repositories, a temp rules file and a temp catalog into the services.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use rulesmith::adapters::filesystem::{CsvCanarySubsetBuilder, FileRulesRepository};
use rulesmith::adapters::sqlite::{
    create_migrated_test_pool, SqliteAppliedChangeRepository, SqliteBatchRepository,
    SqliteBenchmarkRepository, SqliteProposalRepository, SqliteRunAttemptRepository,
    SqliteRunStatsRepository,
};
use rulesmith::domain::errors::{DomainError, DomainResult};
use rulesmith::domain::models::{
    CategoryRule, Config, ConfusionAlert, LevelAccuracy, PipelineQualityGate, PipelineRunOutput,
    PipelineRunRecord, PipelineRunRequest, PipelineRunStatus, RulesDocument, RulesSnapshot,
    RunArtifact, RunAttempt, RunStats, CONFUSION_HOTLIST,
};
use rulesmith::domain::ports::{
    BenchmarkRepository, PipelineRunner, RulesRepository, RunAttemptRepository,
    RunStatsRepository,
};
use rulesmith::services::{
    AttemptExecutor, BatchService, ExecutorPorts, Orchestrator, RulePatchApplier,
};
use uuid::Uuid;

pub const STORE_ID: &str = "test-store";

/// Stats for a healthy run at the given auto-accepted rate.
pub fn stats(auto_accepted_rate: f64) -> RunStats {
    RunStats {
        auto_accepted_rate,
        fallback_category_rate: 0.05,
        needs_review_rate: 0.2,
        attribute_validation_fail_count: 0,
        unique_products_processed: 200,
        top_confusion_alerts: vec![ConfusionAlert {
            expected_slug: "boots".to_string(),
            predicted_slug: "sneakers".to_string(),
            count: 12,
            sample_terms: vec!["leather".to_string(), "ankle".to_string()],
        }],
        quality_gate: PipelineQualityGate { pre_qa_passed: true },
        ..RunStats::default()
    }
}

/// Healthy stats that also report level-1 accuracy, for harness deltas.
pub fn stats_with_l1(auto_accepted_rate: f64, l1: f64) -> RunStats {
    RunStats {
        level_accuracy: LevelAccuracy {
            l1: Some(l1),
            l2: None,
            l3: None,
        },
        ..stats(auto_accepted_rate)
    }
}

/// One scripted pipeline outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Run(RunStats),
    Fail(String),
}

/// Pipeline runner that replays scripted steps and records their stats the
/// way the command runner does.
pub struct ScriptedPipeline {
    steps: Mutex<VecDeque<Step>>,
    stats: Arc<dyn RunStatsRepository>,
    artifact_dir: PathBuf,
    calls: AtomicUsize,
    requests: Mutex<Vec<PipelineRunRequest>>,
    run_prefix: Mutex<String>,
}

impl ScriptedPipeline {
    pub fn new(stats: Arc<dyn RunStatsRepository>, artifact_dir: PathBuf) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            stats,
            artifact_dir,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            run_prefix: Mutex::new("run".to_string()),
        }
    }

    /// Distinguish run ids when several pipelines share one database.
    pub fn set_run_prefix(&self, prefix: &str) {
        *self.run_prefix.lock().unwrap() = prefix.to_string();
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn push_rates(&self, rates: &[f64]) {
        for rate in rates {
            self.push(Step::Run(stats(*rate)));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<PipelineRunRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineRunner for ScriptedPipeline {
    async fn run(&self, request: &PipelineRunRequest) -> DomainResult<PipelineRunOutput> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| {
                DomainError::PipelineFailed("no scripted step left".to_string())
            })?;

        let stats = match step {
            Step::Run(stats) => stats,
            Step::Fail(message) => return Err(DomainError::PipelineFailed(message)),
        };

        let run_id = format!("{}-{n:03}", self.run_prefix.lock().unwrap());
        let hotlist = self.artifact_dir.join(format!("{run_id}_hotlist.txt"));
        let terms: Vec<String> = stats
            .top_confusion_alerts
            .iter()
            .flat_map(|a| a.sample_terms.clone())
            .collect();
        std::fs::create_dir_all(&self.artifact_dir).unwrap();
        std::fs::write(&hotlist, terms.join("\n")).unwrap();
        let artifacts = vec![RunArtifact {
            kind: CONFUSION_HOTLIST.to_string(),
            path: hotlist,
        }];

        self.stats
            .record_run(&PipelineRunRecord {
                run_id: run_id.clone(),
                store_id: request.store_id.clone(),
                run_label: request.run_label.clone(),
                status: PipelineRunStatus::Completed,
                stats,
                artifacts: artifacts.clone(),
                created_at: Utc::now(),
            })
            .await?;

        Ok(PipelineRunOutput { run_id, artifacts })
    }
}

/// A rules document with one rule the generated proposals can target.
pub fn seed_rules() -> RulesDocument {
    let mut doc = RulesDocument::default();
    doc.categories.insert(
        "boots".to_string(),
        CategoryRule {
            min_confidence: Some(0.6),
            auto_accept_threshold: Some(0.8),
            include_terms: vec!["boot".to_string()],
            exclude_terms: vec![],
            required_attributes: vec!["material".to_string(), "shaft_height".to_string()],
            ..Default::default()
        },
    );
    doc
}

/// Everything an orchestrator test needs, rooted in one temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub config: Config,
    pub pipeline: Arc<ScriptedPipeline>,
    pub batches: Arc<SqliteBatchRepository>,
    pub attempts: Arc<SqliteRunAttemptRepository>,
    pub proposals: Arc<SqliteProposalRepository>,
    pub changes: Arc<SqliteAppliedChangeRepository>,
    pub benchmarks: Arc<SqliteBenchmarkRepository>,
    pub run_stats: Arc<SqliteRunStatsRepository>,
    pub rules: Arc<FileRulesRepository>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let pool = create_migrated_test_pool().await.expect("test pool");
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let catalog = dir.path().join("catalog.csv");
        let mut text = String::from("product_id,title\n");
        for i in 0..400 {
            let title = if i % 9 == 0 {
                "leather ankle boot"
            } else {
                "canvas sneaker"
            };
            text.push_str(&format!("p{i},{title} {i}\n"));
        }
        std::fs::write(&catalog, text).unwrap();

        let rules_path = dir.path().join("rules.json");
        std::fs::write(&rules_path, seed_rules().to_canonical_bytes().unwrap()).unwrap();

        let mut config = Config::default();
        config.pipeline.input_path = catalog.display().to_string();
        config.pipeline.store_id = STORE_ID.to_string();
        config.pipeline.work_dir = dir.path().join("work").display().to_string();
        config.rules.path = rules_path.display().to_string();

        let run_stats = Arc::new(SqliteRunStatsRepository::new(pool.clone()));
        let pipeline = Arc::new(ScriptedPipeline::new(
            run_stats.clone(),
            dir.path().join("artifacts"),
        ));

        Self {
            batches: Arc::new(SqliteBatchRepository::new(pool.clone())),
            attempts: Arc::new(SqliteRunAttemptRepository::new(pool.clone())),
            proposals: Arc::new(SqliteProposalRepository::new(pool.clone())),
            changes: Arc::new(SqliteAppliedChangeRepository::new(pool.clone())),
            benchmarks: Arc::new(SqliteBenchmarkRepository::new(pool.clone())),
            rules: Arc::new(FileRulesRepository::new(rules_path)),
            run_stats,
            pipeline,
            config,
            pool,
            dir,
        }
    }

    /// Enough QA feedback for the harness sample-size check to pass.
    pub async fn seed_qa(&self, count: usize) {
        for i in 0..count {
            self.benchmarks
                .record_qa_feedback(STORE_ID, &format!("qa-{i}"), "correct")
                .await
                .unwrap();
        }
    }

    pub fn rules_path(&self) -> PathBuf {
        PathBuf::from(&self.config.rules.path)
    }

    pub fn service(&self) -> BatchService {
        BatchService::new(
            self.batches.clone(),
            self.attempts.clone(),
            self.config.batch.clone(),
        )
    }

    pub fn applier(&self) -> RulePatchApplier {
        RulePatchApplier::new(self.rules.clone(), self.changes.clone())
    }

    pub fn executor(&self) -> AttemptExecutor {
        self.executor_with_rules(self.rules.clone())
    }

    pub fn executor_with_rules(&self, rules: Arc<dyn RulesRepository>) -> AttemptExecutor {
        let ports = ExecutorPorts {
            pipeline: self.pipeline.clone(),
            subsets: Arc::new(CsvCanarySubsetBuilder::new(
                self.dir.path().join("work/canary"),
            )),
            run_stats: self.run_stats.clone(),
            proposals: self.proposals.clone(),
            benchmarks: self.benchmarks.clone(),
            rules,
            changes: self.changes.clone(),
        };
        AttemptExecutor::new(ports, &self.config)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.batches.clone(),
            self.attempts.clone(),
            Arc::new(self.executor()),
        )
    }
}

/// Rules store that lets a fixed number of writes through, then fails.
pub struct FlakyRules {
    inner: Arc<FileRulesRepository>,
    writes_left: AtomicUsize,
}

impl FlakyRules {
    pub fn new(inner: Arc<FileRulesRepository>, writes: usize) -> Self {
        Self {
            inner,
            writes_left: AtomicUsize::new(writes),
        }
    }

    fn take_write(&self) -> DomainResult<()> {
        self.writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| DomainError::RulesStorage("read-only file system".to_string()))
    }
}

#[async_trait]
impl RulesRepository for FlakyRules {
    async fn read(&self) -> DomainResult<RulesSnapshot> {
        self.inner.read().await
    }

    async fn compare_and_swap(
        &self,
        expected_version: &str,
        document: &RulesDocument,
    ) -> DomainResult<RulesSnapshot> {
        self.take_write()?;
        self.inner.compare_and_swap(expected_version, document).await
    }

    async fn compare_and_swap_bytes(
        &self,
        expected_version: &str,
        raw: &[u8],
    ) -> DomainResult<RulesSnapshot> {
        self.take_write()?;
        self.inner.compare_and_swap_bytes(expected_version, raw).await
    }

    async fn restore(&self, snapshot: &RulesSnapshot) -> DomainResult<()> {
        self.inner.restore(snapshot).await
    }
}

/// Attempt store that can start attempts but never finalize them.
pub struct BrokenAttempts(pub Arc<SqliteRunAttemptRepository>);

#[async_trait]
impl RunAttemptRepository for BrokenAttempts {
    async fn start(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
        attempt_no: u32,
    ) -> DomainResult<RunAttempt> {
        self.0.start(batch_id, sequence_no, attempt_no).await
    }

    async fn finalize(&self, _attempt: &RunAttempt) -> DomainResult<()> {
        Err(DomainError::DatabaseError("disk I/O error".to_string()))
    }

    async fn get(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
        attempt_no: u32,
    ) -> DomainResult<Option<RunAttempt>> {
        self.0.get(batch_id, sequence_no, attempt_no).await
    }

    async fn list_for_sequence(
        &self,
        batch_id: Uuid,
        sequence_no: u32,
    ) -> DomainResult<Vec<RunAttempt>> {
        self.0.list_for_sequence(batch_id, sequence_no).await
    }

    async fn list_for_batch(&self, batch_id: Uuid) -> DomainResult<Vec<RunAttempt>> {
        self.0.list_for_batch(batch_id).await
    }
}
