//! Batch summary bookkeeping.

use std::collections::BTreeMap;

use crate::domain::models::{AttemptStatus, BatchSummary, RunAttempt, WorkerFailure};

use super::resume::{plan_sequence, SequencePlan};

/// Accumulates attempt and sequence outcomes into a [`BatchSummary`].
#[derive(Debug, Clone, Default)]
pub struct SummaryAccumulator {
    summary: BatchSummary,
}

impl SummaryAccumulator {
    /// Rebuild counters from persisted attempts, keeping the recovery
    /// reason of the existing summary.
    pub fn rebuild(existing: &BatchSummary, attempts: &[RunAttempt], retry_limit: u32) -> Self {
        let mut acc = Self {
            summary: BatchSummary {
                recovery_reason: existing.recovery_reason.clone(),
                ..BatchSummary::default()
            },
        };

        let mut by_sequence: BTreeMap<u32, Vec<RunAttempt>> = BTreeMap::new();
        for attempt in attempts {
            if attempt.status.is_finished() {
                acc.record_attempt(attempt);
            }
            by_sequence.entry(attempt.sequence_no).or_default().push(attempt.clone());
        }
        for sequence in by_sequence.values() {
            if let SequencePlan::Complete { final_status } = plan_sequence(sequence, retry_limit) {
                acc.record_sequence(final_status);
            }
        }
        acc
    }

    pub fn summary(&self) -> &BatchSummary {
        &self.summary
    }

    pub fn into_summary(self) -> BatchSummary {
        self.summary
    }

    pub fn set_running_sequence(&mut self, sequence_no: Option<u32>) {
        self.summary.running_sequence = sequence_no;
    }

    pub fn set_worker_failure(&mut self, failure: WorkerFailure) {
        self.summary.worker_failure = Some(failure);
    }

    /// Fold in one finished attempt.
    pub fn record_attempt(&mut self, attempt: &RunAttempt) {
        if let Some(run_id) = &attempt.pipeline_run_id {
            self.summary.last_run_id = Some(run_id.clone());
        }
        let Some(learning) = &attempt.learning_result else {
            return;
        };
        let s = &mut self.summary;
        s.proposals_generated += learning.proposals_generated;
        s.proposals_applied += learning.proposals_applied;
        s.structural_applies += learning.structural_applied;
        s.rollbacks += u32::try_from(learning.rolled_back_change_ids.len()).unwrap_or(u32::MAX);
        if let Some(delta) = learning.harness_delta {
            s.harness_delta_samples += 1;
            s.avg_harness_delta +=
                (delta - s.avg_harness_delta) / f64::from(s.harness_delta_samples);
        }
    }

    /// Fold in a sequence that reached a terminal status.
    pub fn record_sequence(&mut self, final_status: AttemptStatus) {
        let s = &mut self.summary;
        s.completed_loops += 1;
        match final_status {
            AttemptStatus::Succeeded => s.success_count += 1,
            AttemptStatus::RetriedSucceeded => s.retried_success_count += 1,
            _ => s.final_failed_count += 1,
        }
        s.gate_pass_rate =
            f64::from(s.success_count + s.retried_success_count) / f64::from(s.completed_loops);
    }
}
