//! CSV canary subset builder.
//!
//! The subset keeps the catalog header and picks rows in two parts: a fixed
//! part (rows matching hotlist terms first, then the leading catalog rows)
//! and a seeded random part drawn from the rest. The same input, seed and
//! hotlist always give the same file. Quoted fields may span lines; such a
//! record is kept or dropped whole.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::CanarySubsetRequest;
use crate::domain::ports::CanarySubsetBuilder;

pub struct CsvCanarySubsetBuilder {
    output_dir: PathBuf,
}

impl CsvCanarySubsetBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl CanarySubsetBuilder for CsvCanarySubsetBuilder {
    async fn build(&self, request: &CanarySubsetRequest) -> DomainResult<PathBuf> {
        let catalog = read_text(&request.input_path).await?;
        let mut records = split_records(&catalog).into_iter();
        let header = records.next().ok_or_else(|| {
            DomainError::CanarySubsetFailed(format!("{} is empty", request.input_path.display()))
        })?;
        let rows: Vec<&str> = records.filter(|r| !r.trim().is_empty()).collect();

        let hot_terms = match &request.hotlist {
            Some(path) => parse_hotlist(&read_text(path).await?),
            None => Vec::new(),
        };

        let picked = select_rows(&rows, &hot_terms, request);

        let mut out = String::with_capacity(header.len() + picked.len() * 64);
        out.push_str(header);
        out.push('\n');
        for idx in &picked {
            out.push_str(rows[*idx]);
            out.push('\n');
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| DomainError::CanarySubsetFailed(e.to_string()))?;
        let path = self
            .output_dir
            .join(format!("canary_subset_{}.csv", request.random_seed));
        tokio::fs::write(&path, out).await.map_err(|e| {
            DomainError::CanarySubsetFailed(format!("failed to write {}: {e}", path.display()))
        })?;

        tracing::info!(
            path = %path.display(),
            rows = picked.len(),
            hot_terms = hot_terms.len(),
            "built canary subset"
        );
        Ok(path)
    }
}

async fn read_text(path: &Path) -> DomainResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        DomainError::CanarySubsetFailed(format!("failed to read {}: {e}", path.display()))
    })
}

/// Split CSV text into records. A newline inside double quotes belongs to
/// the field; an escaped `""` toggles twice and cancels out.
fn split_records(text: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, byte) in text.bytes().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                records.push(text[start..idx].trim_end_matches('\r'));
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        records.push(text[start..].trim_end_matches('\r'));
    }
    records
}

/// Hotlist files hold one term per line; an optional `term` header and
/// blank lines are skipped.
fn parse_hotlist(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty() && l != "term")
        .collect()
}

/// Indices of the chosen rows, in catalog order.
fn select_rows(
    rows: &[&str],
    hot_terms: &[String],
    request: &CanarySubsetRequest,
) -> Vec<usize> {
    if request.sample_size >= rows.len() {
        return (0..rows.len()).collect();
    }

    let ratio = request.fixed_ratio.clamp(0.0, 1.0);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let fixed_quota = ((request.sample_size as f64) * ratio).round() as usize;

    let mut taken = vec![false; rows.len()];
    let mut fixed = 0usize;

    if !hot_terms.is_empty() {
        for (idx, row) in rows.iter().enumerate() {
            if fixed == fixed_quota {
                break;
            }
            let lower = row.to_lowercase();
            if hot_terms.iter().any(|t| lower.contains(t.as_str())) {
                taken[idx] = true;
                fixed += 1;
            }
        }
    }
    for slot in taken.iter_mut() {
        if fixed == fixed_quota {
            break;
        }
        if !*slot {
            *slot = true;
            fixed += 1;
        }
    }

    let remaining: Vec<usize> = (0..rows.len()).filter(|i| !taken[*i]).collect();
    let want = request.sample_size.saturating_sub(fixed).min(remaining.len());
    let mut rng = StdRng::seed_from_u64(request.random_seed);
    for pick in rand::seq::index::sample(&mut rng, remaining.len(), want) {
        taken[remaining[pick]] = true;
    }

    (0..rows.len()).filter(|i| taken[*i]).collect()
}
