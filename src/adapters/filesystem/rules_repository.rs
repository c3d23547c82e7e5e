//! JSON rules file with compare-and-swap writes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RulesDocument, RulesSnapshot};
use crate::domain::ports::RulesRepository;

/// Rules stored as one JSON file.
///
/// Writes go to a sibling temp file and are renamed into place, so readers
/// see either the old or the new bytes. The in-process mutex makes the
/// version check and the rename one step; across processes the batch claim
/// keeps writers apart and the version check catches anything else.
pub struct FileRulesRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRulesRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_bytes(&self) -> DomainResult<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(DomainError::RulesStorage(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write_atomic(&self, bytes: &[u8]) -> DomainResult<()> {
        let storage_err = |e: std::io::Error| {
            DomainError::RulesStorage(format!("failed to write {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "rules".into(), |n| n.to_string_lossy().into_owned());
        let tmp_path = self.path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&tmp_path, bytes).await.map_err(storage_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(storage_err(e));
        }
        Ok(())
    }

    async fn swap_checked(
        &self,
        expected_version: &str,
        next: RulesSnapshot,
    ) -> DomainResult<RulesSnapshot> {
        let _guard = self.write_lock.lock().await;

        let current = RulesSnapshot::from_bytes(self.read_bytes().await?)?;
        if current.version != expected_version {
            return Err(DomainError::RulesVersionConflict {
                expected: expected_version.to_string(),
                actual: current.version,
            });
        }

        self.write_atomic(&next.raw).await?;
        tracing::debug!(
            path = %self.path.display(),
            from = %current.version,
            to = %next.version,
            "rules file swapped"
        );
        Ok(next)
    }
}

#[async_trait]
impl RulesRepository for FileRulesRepository {
    async fn read(&self) -> DomainResult<RulesSnapshot> {
        RulesSnapshot::from_bytes(self.read_bytes().await?)
    }

    async fn compare_and_swap(
        &self,
        expected_version: &str,
        document: &RulesDocument,
    ) -> DomainResult<RulesSnapshot> {
        self.swap_checked(expected_version, RulesSnapshot::from_document(document.clone())?)
            .await
    }

    async fn compare_and_swap_bytes(
        &self,
        expected_version: &str,
        raw: &[u8],
    ) -> DomainResult<RulesSnapshot> {
        self.swap_checked(expected_version, RulesSnapshot::from_bytes(raw.to_vec())?)
            .await
    }

    async fn restore(&self, snapshot: &RulesSnapshot) -> DomainResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_atomic(&snapshot.raw).await?;
        tracing::warn!(
            path = %self.path.display(),
            version = %snapshot.version,
            "rules file restored"
        );
        Ok(())
    }
}
