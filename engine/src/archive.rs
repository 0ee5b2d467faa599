//! Archival and compaction of retired tasks.
//!
//! Aged `completed` tasks are transitioned to `archived` and their
//! directories filed under `archive/<YYYY-MM>/` by completion month. Much
//! older archives are compacted: the directory is replaced by a single
//! `<task_id>.tar.gz` that preserves the relative layout and file modes.
//! Both sweeps are idempotent and keep going past per-task failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadre_core::{
    error::{FsErrorKind, Result, TaskError},
    models::{Task, TaskStatus},
    paths::{ArchiveMonth, PathResolver},
    repository::TaskStore,
};
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::fsio;

/// Moves aged completed tasks into dated archive buckets and compacts
/// long-retired ones.
pub struct ArchivalEngine {
    store: Arc<dyn TaskStore>,
    resolver: PathResolver,
}

impl ArchivalEngine {
    pub fn new(store: Arc<dyn TaskStore>, resolver: PathResolver) -> Self {
        Self { store, resolver }
    }

    /// Archive every `completed` task whose completion is older than the
    /// given number of days. Returns how many were archived; per-task
    /// failures are logged and skipped. Rerunning is a no-op because the
    /// selection only sees `completed` rows.
    pub async fn archive_old(&self, older_than_days: i64, ct: &CancellationToken) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let candidates = self.store.list_completed(Some(cutoff)).await?;

        let mut archived = 0usize;
        for task in candidates {
            if ct.is_cancelled() {
                return Err(TaskError::interrupted("cancelled during archival sweep"));
            }
            match self.archive_one(&task).await {
                Ok(()) => archived += 1,
                Err(err) => {
                    tracing::warn!(task_id = %task.id, error = %err, "archival skipped task")
                }
            }
        }

        if archived > 0 {
            tracing::info!(archived, older_than_days, "archival sweep finished");
        }
        Ok(archived)
    }

    async fn archive_one(&self, task: &Task) -> Result<()> {
        let archived = self
            .store
            .transition(&task.id, task.version, TaskStatus::Archived, Default::default())
            .await?;

        let src = self
            .resolver
            .task_dir_for_status(&task.agent_id, &task.id, TaskStatus::Completed);
        let dst = self.resolver.task_dir(&archived)?;
        let candidates = self.resolver.task_dir_candidates(&task.agent_id, &task.id);
        fsio::move_dir_or_search(&src, &dst, &candidates).await?;
        Ok(())
    }

    /// Compact archived tasks completed more than `older_than_days` ago:
    /// tar-gzip the directory, then remove it. A directory with a
    /// leftover artifact from a partial prior run is simply removed and
    /// counted. Returns how many directories were compacted.
    ///
    /// The selection is by `completed_at`, not archival time, so a task
    /// archived long after completion may be compacted in the same
    /// monitor tick that archived it.
    pub async fn compress_old(
        &self,
        older_than_days: i64,
        ct: &CancellationToken,
    ) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let candidates = self.store.list_archived(cutoff).await?;

        let mut compressed = 0usize;
        for task in candidates {
            if ct.is_cancelled() {
                return Err(TaskError::interrupted("cancelled during compaction sweep"));
            }
            match self.compress_one(&task).await {
                Ok(true) => compressed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(task_id = %task.id, error = %err, "compaction skipped task")
                }
            }
        }

        if compressed > 0 {
            tracing::info!(compressed, older_than_days, "compaction sweep finished");
        }
        Ok(compressed)
    }

    async fn compress_one(&self, task: &Task) -> Result<bool> {
        let Some(completed_at) = task.completed_at else {
            tracing::warn!(task_id = %task.id, "archived task without completed_at; skipping");
            return Ok(false);
        };
        let month = ArchiveMonth::from_datetime(&completed_at);
        let dir = self
            .resolver
            .archived_task_dir(&task.agent_id, &task.id, month);
        let artifact = self
            .resolver
            .archived_task_artifact(&task.agent_id, &task.id, month);

        let dir_exists = tokio::fs::metadata(&dir).await.is_ok();
        let artifact_exists = tokio::fs::metadata(&artifact).await.is_ok();

        match (dir_exists, artifact_exists) {
            // Already compacted on an earlier run
            (false, _) => Ok(false),
            // Partial prior run: the artifact exists, only the cleanup is left
            (true, true) => {
                tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
                    TaskError::fs(
                        crate::fsio::classify(&e),
                        format!("remove '{}': {e}", dir.display()),
                    )
                })?;
                Ok(true)
            }
            (true, false) => {
                compress_dir(&dir, &artifact).await?;
                tokio::fs::remove_dir_all(&dir).await.map_err(|e| {
                    TaskError::fs(
                        crate::fsio::classify(&e),
                        format!("remove '{}': {e}", dir.display()),
                    )
                })?;
                Ok(true)
            }
        }
    }
}

/// Produce `<artifact>` as a gzipped tar of `dir`.
///
/// Entries are stored relative to the directory name, so extraction
/// reproduces `<task_id>/...` with the original nesting and mode bits.
/// The artifact is built under a temporary name and renamed into place.
async fn compress_dir(dir: &Path, artifact: &Path) -> Result<()> {
    let dir_label = dir.display().to_string();
    let dir = dir.to_path_buf();
    let artifact = artifact.to_path_buf();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use flate2::{write::GzEncoder, Compression};

        let tmp: PathBuf = artifact.with_extension("gz.tmp");
        let file = std::fs::File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let root_name = dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "task".into());
        let result = builder
            .append_dir_all(&root_name, &dir)
            .and_then(|_| builder.into_inner())
            .and_then(|encoder| encoder.finish())
            .and_then(|file| file.sync_all());

        match result {
            Ok(()) => std::fs::rename(&tmp, &artifact),
            Err(err) => {
                let _ = std::fs::remove_file(&tmp);
                Err(err)
            }
        }
    })
    .await
    .map_err(|e| TaskError::fs(FsErrorKind::Other, format!("compression task failed: {e}")))?
    .map_err(|e| {
        TaskError::fs(
            crate::fsio::classify(&e),
            format!("compress '{dir_label}': {e}"),
        )
    })
}
