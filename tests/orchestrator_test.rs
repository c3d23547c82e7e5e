//! End-to-end batch runs through the orchestrator with a scripted pipeline.

mod common;

use async_trait::async_trait;
use std::sync::Arc;

use common::{stats, stats_with_l1, BrokenAttempts, FlakyRules, Step, TestEnv};
use rulesmith::domain::errors::{DomainError, DomainResult};
use rulesmith::domain::models::{
    AppliedChangeStatus, ApplyMode, AttemptStatus, AutoApplyPolicy, Batch, BatchStatus, LoopType,
    RunStats, SelfCorrectionContext,
};
use rulesmith::domain::ports::{
    AppliedChangeRepository, BatchRepository, RunAttemptRepository, RunStatsRepository,
};
use rulesmith::services::{
    AttemptOutcome, AttemptRunner, BatchWorker, EnqueueOptions, Orchestrator, WorkerSettings,
    HARNESS_DEGRADE_REASON,
};

fn retries(retry_limit: u32) -> EnqueueOptions {
    EnqueueOptions {
        retry_limit: Some(retry_limit),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_canary_batch_with_retries() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    // seq1 passes, seq2 fails then passes, seq3 fails twice
    env.pipeline.push_rates(&[0.90, 0.60, 0.85, 0.50, 0.55]);

    let batch = env
        .service()
        .enqueue(3, LoopType::Canary, retries(1))
        .await
        .unwrap();

    let finished = env
        .orchestrator()
        .process_next_batch()
        .await
        .unwrap()
        .expect("a batch was queued");
    assert_eq!(finished.id, batch.id);
    assert_eq!(finished.status, BatchStatus::CompletedWithFailures);
    assert!(finished.finished_at.is_some());

    let summary = &finished.summary;
    assert_eq!(summary.completed_loops, 3);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.retried_success_count, 1);
    assert_eq!(summary.final_failed_count, 1);
    assert_eq!(summary.running_sequence, None);
    assert!((summary.gate_pass_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.last_run_id.as_deref(), Some("run-005"));

    let status = |seq, attempt| {
        let attempts = env.attempts.clone();
        let id = batch.id;
        async move { attempts.get(id, seq, attempt).await.unwrap().map(|a| a.status) }
    };
    assert_eq!(status(1, 1).await, Some(AttemptStatus::Succeeded));
    assert_eq!(status(1, 2).await, None);
    assert_eq!(status(2, 1).await, Some(AttemptStatus::Failed));
    assert_eq!(status(2, 2).await, Some(AttemptStatus::RetriedSucceeded));
    assert_eq!(status(3, 1).await, Some(AttemptStatus::Failed));
    assert_eq!(status(3, 2).await, Some(AttemptStatus::RetriedFailed));

    assert_eq!(env.pipeline.calls(), 5);
    assert_eq!(env.pipeline.remaining(), 0);
    assert!(env
        .pipeline
        .requests()
        .iter()
        .all(|r| r.run_label == "canary"));
}

#[tokio::test]
async fn test_retry_carries_failed_metrics_and_degrades() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.60, 0.85]);

    let batch = env
        .service()
        .enqueue(1, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();
    env.orchestrator().process_next_batch().await.unwrap();

    let first = env.attempts.get(batch.id, 1, 1).await.unwrap().unwrap();
    let context = first
        .self_correction_context
        .expect("failed attempt keeps a correction context");
    assert!(context
        .failed_metrics
        .iter()
        .any(|m| m == "canary_auto_accepted_rate"));
    assert_eq!(context.previous_run_id.as_deref(), Some("run-001"));
    assert!(!context.degrade_mode);

    let second = env.attempts.get(batch.id, 1, 2).await.unwrap().unwrap();
    assert_eq!(second.status, AttemptStatus::RetriedSucceeded);
    let learning = second.learning_result.unwrap();
    assert!(learning.degrade_mode);
    assert_eq!(learning.structural_applied, 0);
}

#[tokio::test]
async fn test_correction_context_accumulates_across_retries() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    // only the first run trips the fallback check
    env.pipeline.push(Step::Run(RunStats {
        fallback_category_rate: 0.30,
        ..stats(0.60)
    }));
    env.pipeline.push_rates(&[0.60, 0.60]);

    let batch = env
        .service()
        .enqueue(1, LoopType::Canary, retries(2))
        .await
        .unwrap();
    env.orchestrator().process_next_batch().await.unwrap();
    assert_eq!(env.pipeline.calls(), 3);

    for attempt_no in 1..=3 {
        let attempt = env
            .attempts
            .get(batch.id, 1, attempt_no)
            .await
            .unwrap()
            .unwrap();
        let metrics = attempt.self_correction_context.unwrap().failed_metrics;
        assert!(
            metrics.iter().any(|m| m == "fallback_category_rate"),
            "attempt {attempt_no} lost fallback_category_rate: {metrics:?}"
        );
        assert!(metrics.iter().any(|m| m == "canary_auto_accepted_rate"));
    }
    let last = env.attempts.get(batch.id, 1, 3).await.unwrap().unwrap();
    assert_eq!(last.status, AttemptStatus::RetriedFailed);
}

#[tokio::test]
async fn test_first_canary_builds_subset_without_hotlist() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.90, 0.90]);

    env.service()
        .enqueue(2, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();
    env.orchestrator().process_next_batch().await.unwrap();

    let requests = env.pipeline.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        let subset = std::fs::read_to_string(&request.input_path).unwrap();
        // header plus the configured sample size
        assert_eq!(subset.lines().count(), 201);
        assert!(subset.starts_with("product_id,title"));
    }

    let state = env
        .run_stats
        .get_canary_state(common::STORE_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.run_id, "run-002");
    assert!(state.hotlist_path.exists());
}

#[tokio::test]
async fn test_full_loop_applies_and_records_changes() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.70]);
    let before = std::fs::read(env.rules_path()).unwrap();

    let batch = env
        .service()
        .enqueue(1, LoopType::Full, EnqueueOptions::default())
        .await
        .unwrap();
    let finished = env
        .orchestrator()
        .process_next_batch()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(env.pipeline.requests()[0].run_label, "full");
    assert_eq!(
        env.pipeline.requests()[0].input_path,
        std::path::PathBuf::from(&env.config.pipeline.input_path)
    );

    let attempt = env.attempts.get(batch.id, 1, 1).await.unwrap().unwrap();
    let learning = attempt.learning_result.unwrap();
    assert_eq!(learning.apply_mode, ApplyMode::Full);
    assert!(learning.proposals_applied > 0);
    assert_eq!(finished.summary.proposals_applied, learning.proposals_applied);

    let changes = env.changes.list(50).await.unwrap();
    assert_eq!(changes.len() as u32, learning.proposals_applied);
    assert!(changes.iter().all(|c| c.metadata.batch_id == Some(batch.id)));
    assert_ne!(std::fs::read(env.rules_path()).unwrap(), before);
}

#[tokio::test]
async fn test_apply_failure_keeps_earlier_changes_in_the_attempt() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.70]);

    let rules = Arc::new(FlakyRules::new(env.rules.clone(), 1));
    let orchestrator = Orchestrator::new(
        env.batches.clone(),
        env.attempts.clone(),
        Arc::new(env.executor_with_rules(rules)),
    );
    let batch = env
        .service()
        .enqueue(1, LoopType::Full, retries(0))
        .await
        .unwrap();
    let finished = orchestrator.process_next_batch().await.unwrap().unwrap();

    assert_eq!(finished.status, BatchStatus::CompletedWithFailures);
    assert!(finished.summary.worker_failure.is_none());
    assert_eq!(finished.summary.proposals_applied, 1);

    let attempt = env.attempts.get(batch.id, 1, 1).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(attempt
        .error
        .as_deref()
        .unwrap()
        .contains("read-only file system"));
    let learning = attempt.learning_result.unwrap();
    assert_eq!(learning.proposals_applied, 1);
    assert!(learning.proposals_generated >= 2);

    let changes = env.changes.list(50).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(learning.applied_change_ids, vec![changes[0].id]);

    let context = attempt.self_correction_context.unwrap();
    assert!(context.error_message.is_some());
    assert!(context
        .failed_metrics
        .iter()
        .any(|m| m == "rules_storage_error"));
}

#[tokio::test]
async fn test_harness_degrade_rolls_back_earlier_change() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    // the second run loses ten points of level-1 accuracy
    env.pipeline.push(Step::Run(stats_with_l1(0.70, 0.90)));
    env.pipeline.push(Step::Run(stats_with_l1(0.70, 0.80)));

    let batch = env
        .service()
        .enqueue(2, LoopType::Full, retries(0))
        .await
        .unwrap();
    let finished = env
        .orchestrator()
        .process_next_batch()
        .await
        .unwrap()
        .unwrap();

    let first = env.attempts.get(batch.id, 1, 1).await.unwrap().unwrap();
    let applied = first.learning_result.unwrap().applied_change_ids;
    assert!(!applied.is_empty());

    let second = env.attempts.get(batch.id, 2, 1).await.unwrap().unwrap();
    assert_eq!(second.status, AttemptStatus::Failed);
    let learning = second.learning_result.unwrap();
    assert!(!learning.harness_passed);
    assert_eq!(learning.apply_mode, ApplyMode::None);
    assert_eq!(learning.proposals_applied, 0);
    assert_eq!(learning.rolled_back_change_ids.len(), 1);

    let rolled_back = learning.rolled_back_change_ids[0];
    assert_eq!(Some(&rolled_back), applied.last());
    let change = env.changes.get(rolled_back).await.unwrap().unwrap();
    assert_eq!(change.status, AppliedChangeStatus::RolledBack);
    let events = env.changes.list_rollback_events(rolled_back).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, HARNESS_DEGRADE_REASON);
    assert_eq!(events[0].reason, "harness_degrade_detected");

    assert_eq!(finished.status, BatchStatus::CompletedWithFailures);
    assert_eq!(finished.summary.rollbacks, 1);
    assert_eq!(finished.summary.proposals_applied as usize, applied.len());
}

#[tokio::test]
async fn test_never_policy_stores_proposals_without_applying() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.95]);
    let before = std::fs::read(env.rules_path()).unwrap();

    env.service()
        .enqueue(
            1,
            LoopType::Full,
            EnqueueOptions {
                auto_apply_policy: Some(AutoApplyPolicy::Never),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let finished = env
        .orchestrator()
        .process_next_batch()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, BatchStatus::Completed);
    assert!(finished.summary.proposals_generated > 0);
    assert_eq!(finished.summary.proposals_applied, 0);
    assert!(env.changes.list(50).await.unwrap().is_empty());
    assert_eq!(std::fs::read(env.rules_path()).unwrap(), before);
}

#[tokio::test]
async fn test_small_benchmark_fails_without_retry() {
    let env = TestEnv::new().await;
    // no QA feedback: 12 hard cases is below the minimum sample
    env.pipeline.push_rates(&[0.95, 0.95]);

    let batch = env
        .service()
        .enqueue(1, LoopType::Canary, retries(1))
        .await
        .unwrap();
    let finished = env
        .orchestrator()
        .process_next_batch()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, BatchStatus::CompletedWithFailures);
    assert_eq!(env.pipeline.calls(), 1);
    let attempt = env.attempts.get(batch.id, 1, 1).await.unwrap().unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(attempt.error.is_none());
    assert_eq!(attempt.learning_result.unwrap().apply_mode, ApplyMode::None);
}

#[tokio::test]
async fn test_runtime_failures_exhaust_retries() {
    let env = TestEnv::new().await;
    env.pipeline
        .push(Step::Fail("pipeline exited with status 2".to_string()));
    env.pipeline
        .push(Step::Fail("pipeline exited with status 2".to_string()));

    let batch = env
        .service()
        .enqueue(1, LoopType::Full, retries(1))
        .await
        .unwrap();
    let finished = env
        .orchestrator()
        .process_next_batch()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.status, BatchStatus::CompletedWithFailures);
    assert!(finished.summary.worker_failure.is_none());

    let attempts = env.attempts.list_for_batch(batch.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    let last = attempts.iter().max_by_key(|a| a.attempt_no).unwrap();
    assert_eq!(last.status, AttemptStatus::RetriedFailed);
    assert!(last.error.as_deref().unwrap().contains("status 2"));
    assert!(last
        .self_correction_context
        .as_ref()
        .unwrap()
        .error_message
        .is_some());
}

struct DivergingRunner;

#[async_trait]
impl AttemptRunner for DivergingRunner {
    async fn execute(
        &self,
        _batch: &Batch,
        _sequence_no: u32,
        _attempt_no: u32,
        _carried: Option<&SelfCorrectionContext>,
    ) -> DomainResult<AttemptOutcome> {
        Err(DomainError::RulesDiverged {
            cause: "Database error: locked".to_string(),
            restore_error: "Rules storage error: disk full".to_string(),
        })
    }
}

#[tokio::test]
async fn test_diverged_rules_abort_the_batch() {
    let env = TestEnv::new().await;
    let orchestrator = Orchestrator::new(
        env.batches.clone(),
        env.attempts.clone(),
        Arc::new(DivergingRunner),
    );
    let batch = env
        .service()
        .enqueue(3, LoopType::Canary, retries(2))
        .await
        .unwrap();

    let finished = orchestrator.process_next_batch().await.unwrap().unwrap();
    assert_eq!(finished.id, batch.id);
    assert_eq!(finished.status, BatchStatus::Failed);
    let failure = finished.summary.worker_failure.expect("worker failure recorded");
    assert!(failure.message.contains("restore failed"));

    // no retry and no later sequence after the divergence
    let attempts = env.attempts.list_for_batch(batch.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Failed);
    assert!(attempts[0]
        .error
        .as_deref()
        .unwrap()
        .contains("no longer matches"));
}

#[tokio::test]
async fn test_repository_failure_after_claim_fails_the_batch() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.90]);

    let orchestrator = Orchestrator::new(
        env.batches.clone(),
        Arc::new(BrokenAttempts(env.attempts.clone())),
        Arc::new(env.executor()),
    );
    let batch = env
        .service()
        .enqueue(2, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();

    let finished = orchestrator.process_next_batch().await.unwrap().unwrap();
    assert_eq!(finished.id, batch.id);
    assert_eq!(finished.status, BatchStatus::Failed);
    assert!(finished.finished_at.is_some());
    let failure = finished.summary.worker_failure.expect("worker failure recorded");
    assert!(failure.message.contains("disk I/O error"));
    assert_eq!(env.pipeline.calls(), 1);

    let stored = env.batches.get(batch.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Failed);
    assert!(stored.summary.worker_failure.is_some());
}

#[tokio::test]
async fn test_cancel_before_claim() {
    let env = TestEnv::new().await;
    let service = env.service();
    let batch = service
        .enqueue(2, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();

    let cancelled = service.cancel(batch.id).await.unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);

    assert!(env
        .orchestrator()
        .process_next_batch()
        .await
        .unwrap()
        .is_none());
    assert_eq!(env.pipeline.calls(), 0);
    assert!(service.cancel(batch.id).await.is_err());
}

#[tokio::test]
async fn test_cancel_while_running_stops_before_next_sequence() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.90, 0.90, 0.90]);

    let batch = env
        .service()
        .enqueue(3, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();
    let claimed = env.batches.claim_next_queued().await.unwrap().unwrap();
    env.batches.request_cancel(batch.id).await.unwrap();

    let finished = env.orchestrator().run_batch(&claimed).await.unwrap();
    assert_eq!(finished.status, BatchStatus::Cancelled);
    assert_eq!(env.pipeline.calls(), 0);
    assert!(env
        .attempts
        .list_for_batch(batch.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_worker_once_drains_queue_in_order() {
    let env = TestEnv::new().await;
    env.seed_qa(60).await;
    env.pipeline.push_rates(&[0.90, 0.90, 0.90]);

    let service = env.service();
    let first = service
        .enqueue(1, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();
    let second = service
        .enqueue(2, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();

    let worker = BatchWorker::new(
        Arc::new(env.orchestrator()),
        env.batches.clone(),
        WorkerSettings::from_config(&env.config.batch, true),
    );
    let report = worker.run().await.unwrap();

    let ids: Vec<_> = report.processed.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(report
        .processed
        .iter()
        .all(|b| b.status == BatchStatus::Completed));
    assert_eq!(report.recovered_attempts, 0);
    assert_eq!(env.pipeline.calls(), 3);
}

#[tokio::test]
async fn test_stopped_worker_processes_nothing() {
    let env = TestEnv::new().await;
    env.service()
        .enqueue(1, LoopType::Canary, EnqueueOptions::default())
        .await
        .unwrap();

    let worker = BatchWorker::new(
        Arc::new(env.orchestrator()),
        env.batches.clone(),
        WorkerSettings::from_config(&env.config.batch, false),
    );
    worker.handle().stop();
    let report = worker.run().await.unwrap();

    assert!(report.processed.is_empty());
    assert_eq!(
        env.batches.list(10).await.unwrap()[0].status,
        BatchStatus::Queued
    );
}
