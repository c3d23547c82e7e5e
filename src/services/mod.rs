//! Service layer: the self-improvement loop and the queue operations around it.

pub mod apply_policy;
pub mod attempt_executor;
pub mod batch_service;
pub mod harness;
pub mod orchestrator;
pub mod proposal_generator;
pub mod quality_gate;
pub mod rule_patcher;

pub use apply_policy::{decide_apply_mode, ApplyDecision, ApplyInputs};
pub use attempt_executor::{AttemptExecutor, AttemptOutcome, AttemptRunner, ExecutorPorts};
pub use batch_service::{BatchDetail, BatchService, EnqueueOptions, IntentResponse};
pub use harness::HarnessEvaluator;
pub use orchestrator::{BatchWorker, Orchestrator, WorkerHandle, WorkerReport, WorkerSettings};
pub use proposal_generator::{ProposalContext, ProposalGenerator};
pub use quality_gate::QualityGate;
pub use rule_patcher::{apply_patch, invert_patch, RulePatchApplier, HARNESS_DEGRADE_REASON};
