//! Domain models for the self-improvement loop.

pub mod applied_change;
pub mod batch;
pub mod benchmark;
pub mod config;
pub mod intent;
pub mod pipeline;
pub mod proposal;
pub mod rules;
pub mod run_attempt;

pub use applied_change::{
    AppliedChange, AppliedChangeMetadata, AppliedChangeStatus, RollbackEvent, RollbackScope,
    RuleDiff,
};
pub use batch::{AutoApplyPolicy, Batch, BatchStatus, BatchSummary, LoopType, WorkerFailure};
pub use benchmark::{BenchmarkSnapshot, HarnessEvalResult, HarnessRun};
pub use config::{
    BatchConfig, CanaryConfig, Config, DatabaseConfig, HarnessConfig, LoggingConfig,
    PipelineConfig, ProposalConfig, QualityGateConfig, RulesConfig,
};
pub use intent::Intent;
pub use pipeline::{
    CanaryState, CanarySubsetRequest, ConfusionAlert, LevelAccuracy, PipelineQualityGate,
    PipelineRunOutput, PipelineRunRecord, PipelineRunRequest, PipelineRunStatus, RunArtifact,
    RunStats, CONFUSION_HOTLIST,
};
pub use proposal::{
    PatchAction, PayloadViolation, Proposal, ProposalKind, ProposalPayload, ProposalStatus,
    RuleField, ViolationSeverity,
};
pub use rules::{rules_version, CategoryRule, RulesDocument, RulesSnapshot};
pub use run_attempt::{
    infer_failed_metrics, ApplyMode, AttemptStatus, LearningResult, QualityGateResult,
    RunAttempt, SelfCorrectionContext,
};
