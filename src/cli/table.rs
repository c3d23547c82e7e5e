//! Table output formatting for CLI commands
//!
//! Batches, attempts, proposals and applied changes rendered with comfy-table,
//! color-coded by status unless `NO_COLOR` is set.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::cli::output::{short_id, truncate};
use crate::domain::models::{
    AppliedChange, AppliedChangeStatus, AttemptStatus, Batch, BatchStatus, Proposal,
    ProposalStatus, RunAttempt,
};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableFormatter {
    pub fn new() -> Self {
        Self { use_colors: supports_color() }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }

    pub fn format_batches(&self, batches: &[Batch]) -> String {
        let mut table = base_table();
        table.set_header(header(&[
            "ID",
            "Type",
            "Status",
            "Loops",
            "OK",
            "Retried OK",
            "Failed",
            "Created",
        ]));

        for batch in batches {
            let s = &batch.summary;
            table.add_row(vec![
                Cell::new(short_id(&batch.id)),
                Cell::new(batch.loop_type),
                self.status_cell(batch.status.as_str(), batch_status_color(batch.status)),
                Cell::new(format!("{}/{}", s.completed_loops, batch.requested_count)),
                Cell::new(s.success_count),
                Cell::new(s.retried_success_count),
                Cell::new(s.final_failed_count),
                Cell::new(batch.created_at.format("%Y-%m-%d %H:%M")),
            ]);
        }
        table.to_string()
    }

    pub fn format_attempts(&self, attempts: &[RunAttempt]) -> String {
        let mut table = base_table();
        table.set_header(header(&["Seq", "Attempt", "Status", "Run", "Gate", "Error"]));

        for attempt in attempts {
            let gate = attempt.gate_result.as_ref().map_or("-".to_string(), |g| {
                if g.passed {
                    "passed".to_string()
                } else {
                    format!("failed: {}", g.failed_metrics.join(", "))
                }
            });
            table.add_row(vec![
                Cell::new(attempt.sequence_no),
                Cell::new(attempt.attempt_no),
                self.status_cell(attempt.status.as_str(), attempt_status_color(attempt.status)),
                Cell::new(attempt.pipeline_run_id.as_deref().unwrap_or("-")),
                Cell::new(truncate(&gate, 40)),
                Cell::new(truncate(attempt.error.as_deref().unwrap_or("-"), 40)),
            ]);
        }
        table.to_string()
    }

    pub fn format_proposals(&self, proposals: &[Proposal]) -> String {
        let mut table = base_table();
        table.set_header(header(&[
            "ID",
            "Kind",
            "Status",
            "Target",
            "Change",
            "Confidence",
            "Impact",
        ]));

        for proposal in proposals {
            let p = &proposal.payload;
            let color = match proposal.status {
                ProposalStatus::Applied => Color::Green,
                ProposalStatus::Rejected | ProposalStatus::RolledBack => Color::Red,
                ProposalStatus::Proposed => Color::Yellow,
            };
            table.add_row(vec![
                Cell::new(short_id(&proposal.id)),
                Cell::new(proposal.kind.as_str()),
                self.status_cell(proposal.status.as_str(), color),
                Cell::new(truncate(&p.target_slug, 24)),
                Cell::new(truncate(&format!("{} {} {}", p.field, p.action.as_str(), p.value), 40)),
                Cell::new(format!("{:.2}", proposal.confidence_score)),
                Cell::new(format!("{:.2}", proposal.expected_impact_score)),
            ]);
        }
        table.to_string()
    }

    pub fn format_changes(&self, changes: &[AppliedChange]) -> String {
        let mut table = base_table();
        table.set_header(header(&["ID", "Kind", "Status", "Mode", "Target", "Version", "Applied"]));

        for change in changes {
            let color = match change.status {
                AppliedChangeStatus::Applied => Color::Green,
                AppliedChangeStatus::RolledBack => Color::DarkGrey,
            };
            table.add_row(vec![
                Cell::new(short_id(&change.id)),
                Cell::new(change.kind.as_str()),
                self.status_cell(change.status.as_str(), color),
                Cell::new(change.metadata.apply_mode.as_str()),
                Cell::new(format!("{}.{}", change.metadata.target_slug, change.metadata.field)),
                Cell::new(format!(
                    "{} -> {}",
                    short_id(&change.version_before),
                    short_id(&change.version_after)
                )),
                Cell::new(change.applied_at.format("%Y-%m-%d %H:%M")),
            ]);
        }
        table.to_string()
    }

    fn status_cell(&self, text: &str, color: Color) -> Cell {
        if self.use_colors {
            Cell::new(text).fg(color)
        } else {
            Cell::new(text)
        }
    }
}

fn base_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::new(n).add_attribute(Attribute::Bold)).collect()
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    env::var("TERM").map_or(true, |term| term != "dumb")
}

const fn batch_status_color(status: BatchStatus) -> Color {
    match status {
        BatchStatus::Queued => Color::Yellow,
        BatchStatus::Running => Color::Blue,
        BatchStatus::Completed => Color::Green,
        BatchStatus::CompletedWithFailures => Color::Magenta,
        BatchStatus::Failed => Color::Red,
        BatchStatus::Cancelled => Color::DarkGrey,
    }
}

const fn attempt_status_color(status: AttemptStatus) -> Color {
    match status {
        AttemptStatus::Queued => Color::Yellow,
        AttemptStatus::Running => Color::Blue,
        AttemptStatus::Succeeded | AttemptStatus::RetriedSucceeded => Color::Green,
        AttemptStatus::Failed | AttemptStatus::RetriedFailed => Color::Red,
    }
}
