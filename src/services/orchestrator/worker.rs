//! Polling worker around the orchestrator.

use chrono::Duration as ChronoDuration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Batch, BatchConfig};
use crate::domain::ports::BatchRepository;

use super::Orchestrator;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub stale_after: ChronoDuration,
    /// Stop once the queue is empty instead of polling.
    pub once: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &BatchConfig, once: bool) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            stale_after: ChronoDuration::minutes(config.stale_after_minutes),
            once,
        }
    }
}

/// What a worker run did.
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub processed: Vec<Batch>,
    pub recovered_attempts: usize,
    pub requeued_batches: usize,
}

/// Cloneable handle used to stop a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl WorkerHandle {
    /// Ask the worker to stop. A batch in progress finishes first.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }
}

/// Sweeps stale attempts, then drains the queue one batch at a time.
pub struct BatchWorker {
    orchestrator: Arc<Orchestrator>,
    batches: Arc<dyn BatchRepository>,
    settings: WorkerSettings,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl BatchWorker {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        batches: Arc<dyn BatchRepository>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            orchestrator,
            batches,
            settings,
            stop_flag: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle { stop_flag: self.stop_flag.clone(), wake: self.wake.clone() }
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn run(&self) -> DomainResult<WorkerReport> {
        let mut report = WorkerReport::default();
        tracing::info!(
            once = self.settings.once,
            poll_secs = self.settings.poll_interval.as_secs(),
            "worker started"
        );

        while !self.stopped() {
            let recovery = self.batches.recover_stale(self.settings.stale_after).await?;
            report.recovered_attempts += recovery.recovered_attempts.len();
            report.requeued_batches += recovery.requeued_batches.len();

            if let Some(batch) = self.orchestrator.process_next_batch().await? {
                report.processed.push(batch);
                continue;
            }

            if self.settings.once {
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(self.settings.poll_interval) => {}
                () = self.wake.notified() => {}
            }
        }

        tracing::info!(processed = report.processed.len(), "worker stopped");
        Ok(report)
    }
}
