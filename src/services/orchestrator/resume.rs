//! Resume planning and attempt status decisions.
//!
//! Both are pure so the retry rules can be checked without a database.

use crate::domain::models::{AttemptStatus, RunAttempt, SelfCorrectionContext};

/// What to do with a sequence when the orchestrator reaches it.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencePlan {
    /// Latest attempt is terminal; nothing to run.
    Complete { final_status: AttemptStatus },
    /// Run `attempt_no`, seeded with the previous attempt's context.
    Run { attempt_no: u32, carried: Option<SelfCorrectionContext> },
}

/// Plan a sequence from its persisted attempts (any order).
///
/// A failed attempt without an error message is a pure gate failure and is
/// terminal on resume. A runtime failure resumes at the next attempt while
/// the retry budget lasts. An attempt left running or queued is re-run
/// under the same number.
pub fn plan_sequence(attempts: &[RunAttempt], retry_limit: u32) -> SequencePlan {
    let Some(latest) = attempts.iter().max_by_key(|a| a.attempt_no) else {
        return SequencePlan::Run { attempt_no: 1, carried: None };
    };

    match latest.status {
        AttemptStatus::Succeeded
        | AttemptStatus::RetriedSucceeded
        | AttemptStatus::RetriedFailed => SequencePlan::Complete {
            final_status: latest.status,
        },
        AttemptStatus::Failed if latest.is_pure_gate_failure() => {
            SequencePlan::Complete { final_status: AttemptStatus::Failed }
        }
        AttemptStatus::Failed if latest.attempt_no <= retry_limit => SequencePlan::Run {
            attempt_no: latest.attempt_no + 1,
            carried: Some(carried_context(latest)),
        },
        AttemptStatus::Failed => SequencePlan::Complete { final_status: AttemptStatus::Failed },
        AttemptStatus::Running | AttemptStatus::Queued => {
            let previous = attempts
                .iter()
                .filter(|a| a.attempt_no < latest.attempt_no)
                .max_by_key(|a| a.attempt_no);
            SequencePlan::Run {
                attempt_no: latest.attempt_no,
                carried: previous.map(carried_context),
            }
        }
    }
}

fn carried_context(attempt: &RunAttempt) -> SelfCorrectionContext {
    let mut context = attempt.self_correction_context.clone().unwrap_or_default();
    context.failed_metrics = attempt.recorded_failed_metrics();
    if context.error_message.is_none() {
        context.error_message.clone_from(&attempt.error);
    }
    if context.previous_run_id.is_none() {
        context.previous_run_id.clone_from(&attempt.pipeline_run_id);
    }
    context
}

/// Status for a finished attempt and whether the sequence goes on.
///
/// | passed | retryable | attempt        | status            |
/// |--------|-----------|----------------|-------------------|
/// | yes    |           | 1              | succeeded         |
/// | yes    |           | > 1            | retried_succeeded |
/// | no     | yes       | <= retry_limit | failed (continue) |
/// | no     |           | 1              | failed            |
/// | no     |           | > 1            | retried_failed    |
pub fn decide_attempt_status(
    passed: bool,
    retryable: bool,
    attempt_no: u32,
    retry_limit: u32,
) -> (AttemptStatus, bool) {
    match (passed, attempt_no) {
        (true, 1) => (AttemptStatus::Succeeded, false),
        (true, _) => (AttemptStatus::RetriedSucceeded, false),
        (false, n) if retryable && n <= retry_limit => (AttemptStatus::Failed, true),
        (false, 1) => (AttemptStatus::Failed, false),
        (false, _) => (AttemptStatus::RetriedFailed, false),
    }
}
