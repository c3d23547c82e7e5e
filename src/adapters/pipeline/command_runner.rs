//! Pipeline runner that shells out to a configured command.
//!
//! The command receives its inputs through environment variables and prints
//! one JSON report on stdout:
//!
//! ```json
//! {
//!   "run_id": "optional",
//!   "stats": {...},
//!   "artifacts": [{"kind": "confusion_hotlist", "path": "hotlist.csv"}]
//! }
//! ```
//!
//! Relative artifact paths are resolved against the run's output directory.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    PipelineConfig, PipelineRunOutput, PipelineRunRecord, PipelineRunRequest, PipelineRunStatus,
    RunArtifact, RunStats,
};
use crate::domain::ports::{PipelineRunner, RunStatsRepository};

#[derive(Debug, Deserialize)]
struct PipelineReport {
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    stats: RunStats,
    #[serde(default)]
    artifacts: Vec<RunArtifact>,
}

pub struct CommandPipelineRunner {
    command: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
    stats: Arc<dyn RunStatsRepository>,
}

impl CommandPipelineRunner {
    pub fn new(config: &PipelineConfig, stats: Arc<dyn RunStatsRepository>) -> Self {
        Self {
            command: config.command.clone(),
            work_dir: PathBuf::from(&config.work_dir),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            stats,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn record(
        &self,
        run_id: &str,
        request: &PipelineRunRequest,
        status: PipelineRunStatus,
        stats: RunStats,
        artifacts: Vec<RunArtifact>,
    ) -> DomainResult<()> {
        self.stats
            .record_run(&PipelineRunRecord {
                run_id: run_id.to_string(),
                store_id: request.store_id.clone(),
                run_label: request.run_label.clone(),
                status,
                stats,
                artifacts,
                created_at: Utc::now(),
            })
            .await
    }

    async fn record_failed(&self, run_id: &str, request: &PipelineRunRequest) -> DomainResult<()> {
        self.record(
            run_id,
            request,
            PipelineRunStatus::Failed,
            RunStats::default(),
            Vec::new(),
        )
        .await
    }
}

#[async_trait]
impl PipelineRunner for CommandPipelineRunner {
    async fn run(&self, request: &PipelineRunRequest) -> DomainResult<PipelineRunOutput> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            DomainError::ValidationFailed("pipeline.command is not configured".to_string())
        })?;

        let suffix = Uuid::new_v4().simple().to_string();
        let provisional_id = format!("{}-{}", request.run_label, &suffix[..12]);
        let output_dir = self.work_dir.join("runs").join(&provisional_id);
        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            DomainError::PipelineFailed(format!("failed to create {}: {e}", output_dir.display()))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("RULESMITH_INPUT_PATH", &request.input_path)
            .env("RULESMITH_STORE_ID", &request.store_id)
            .env("RULESMITH_RUN_LABEL", &request.run_label)
            .env("RULESMITH_RUN_ID", &provisional_id)
            .env("RULESMITH_OUTPUT_DIR", &output_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            program = %program,
            run_id = %provisional_id,
            input = %request.input_path.display(),
            "starting pipeline run"
        );

        let child = cmd
            .spawn()
            .map_err(|e| DomainError::PipelineFailed(format!("failed to spawn {program}: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DomainError::PipelineFailed(e.to_string()))?,
            Err(_) => {
                self.record_failed(&provisional_id, request).await?;
                return Err(DomainError::PipelineFailed(format!(
                    "pipeline timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(5)..].join("\n");
            self.record_failed(&provisional_id, request).await?;
            return Err(DomainError::PipelineFailed(format!(
                "pipeline exited with {}: {}",
                output.status,
                tail.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report: PipelineReport = serde_json::from_str(stdout.trim()).map_err(|e| {
            DomainError::PipelineFailed(format!("pipeline report is not valid JSON: {e}"))
        })?;

        let run_id = report.run_id.unwrap_or(provisional_id);
        let artifacts: Vec<RunArtifact> = report
            .artifacts
            .into_iter()
            .map(|a| RunArtifact {
                path: if a.path.is_absolute() {
                    a.path
                } else {
                    output_dir.join(a.path)
                },
                kind: a.kind,
            })
            .collect();

        self.record(
            &run_id,
            request,
            PipelineRunStatus::Completed,
            report.stats,
            artifacts.clone(),
        )
        .await?;
        tracing::info!(run_id = %run_id, artifacts = artifacts.len(), "pipeline run completed");

        Ok(PipelineRunOutput { run_id, artifacts })
    }
}
