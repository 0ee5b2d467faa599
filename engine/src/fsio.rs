//! Crash-consistent filesystem primitives.
//!
//! Two operations underpin every workspace mutation: atomic file writes
//! (temp file + fsync + rename) and directory moves with an optional
//! search fallback. Nothing here knows about tasks; callers hand in
//! resolved paths.

use std::io;
use std::path::{Path, PathBuf};

use cadre_core::error::{FsErrorKind, Result, TaskError};
use tokio::io::AsyncWriteExt;

/// Classify a platform error into the engine's filesystem error kinds.
pub fn classify(err: &io::Error) -> FsErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => FsErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => FsErrorKind::DiskFull,
        io::ErrorKind::CrossesDevices => FsErrorKind::CrossDevice,
        _ => FsErrorKind::Other,
    }
}

fn fs_err(op: &str, path: &Path, err: &io::Error) -> TaskError {
    TaskError::fs(classify(err), format!("{op} '{}': {err}", path.display()))
}

/// How a directory move was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The source existed and was renamed
    Moved,
    /// The source was missing; the directory was found and renamed from
    /// another probed location
    Recovered(PathBuf),
    /// Nothing was found anywhere; an empty destination was created
    CreatedEmpty,
}

/// Write `bytes` to `path` atomically.
///
/// The data lands in a temp file in the destination directory, is fsynced,
/// and is renamed over the target. Parent directories are created on
/// demand. On any failure the temp file is removed and the target is left
/// untouched.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        TaskError::fs(
            FsErrorKind::Other,
            format!("'{}' has no parent directory", path.display()),
        )
    })?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| fs_err("create_dir_all", parent, &e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(
        ".{file_name}.tmp-{}",
        uuid::Uuid::new_v4().simple()
    ));

    let write_result = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| fs_err("create", &tmp, &e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| fs_err("write", &tmp, &e))?;
        file.sync_all().await.map_err(|e| fs_err("fsync", &tmp, &e))?;
        Ok(())
    }
    .await;

    match write_result {
        Ok(()) => match tokio::fs::rename(&tmp, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(fs_err("rename", path, &e))
            }
        },
        Err(err) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(err)
        }
    }
}

/// Move a directory subtree from `src` to `dst`.
///
/// An existing destination is removed first; the destination's parent is
/// created on demand. A rename across filesystems falls back to
/// copy-then-unlink.
pub async fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    if tokio::fs::metadata(dst).await.is_ok() {
        tokio::fs::remove_dir_all(dst)
            .await
            .map_err(|e| fs_err("remove_dir_all", dst, &e))?;
    }
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fs_err("create_dir_all", parent, &e))?;
    }

    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if classify(&e) == FsErrorKind::CrossDevice => {
            copy_tree(src, dst).await?;
            tokio::fs::remove_dir_all(src)
                .await
                .map_err(|e| fs_err("remove_dir_all", src, &e))
        }
        Err(e) => Err(fs_err("rename", src, &e)),
    }
}

/// Move a directory, probing `candidates` when the source is missing.
///
/// The workspace is derived state, so a missing source is drift rather
/// than corruption: the directory is searched for under its sibling
/// status folders and renamed from wherever it is found. When it exists
/// nowhere, an empty destination is materialized so the layout contract
/// holds again.
pub async fn move_dir_or_search(
    src: &Path,
    dst: &Path,
    candidates: &[PathBuf],
) -> Result<MoveOutcome> {
    if tokio::fs::metadata(src).await.is_ok() {
        move_dir(src, dst).await?;
        return Ok(MoveOutcome::Moved);
    }

    for candidate in candidates {
        if candidate == src || candidate == dst {
            continue;
        }
        if tokio::fs::metadata(candidate).await.is_ok() {
            tracing::warn!(
                expected = %src.display(),
                found = %candidate.display(),
                "task directory found under unexpected status folder"
            );
            move_dir(candidate, dst).await?;
            return Ok(MoveOutcome::Recovered(candidate.clone()));
        }
    }

    tokio::fs::create_dir_all(dst)
        .await
        .map_err(|e| fs_err("create_dir_all", dst, &e))?;
    Ok(MoveOutcome::CreatedEmpty)
}

/// Recursively copy a directory tree. Used only for cross-device moves.
async fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to)
            .await
            .map_err(|e| fs_err("create_dir_all", &to, &e))?;
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| fs_err("read_dir", &from, &e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| fs_err("read_dir", &from, &e))?
        {
            let entry_path = entry.path();
            let target = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| fs_err("stat", &entry_path, &e))?;
            if file_type.is_dir() {
                pending.push((entry_path, target));
            } else {
                tokio::fs::copy(&entry_path, &target)
                    .await
                    .map_err(|e| fs_err("copy", &entry_path, &e))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_parents_and_content() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("a/b/c/plan.md");

        write_atomic(&target, b"# Plan\n").await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"# Plan\n");

        // Overwrite replaces the content in place
        write_atomic(&target, b"updated").await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"updated");
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.json");
        write_atomic(&target, b"{}").await.unwrap();

        let mut names = vec![];
        let mut entries = tokio::fs::read_dir(tmp.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["out.json".to_string()]);
    }

    #[tokio::test]
    async fn test_move_dir_replaces_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("nested/dst");
        tokio::fs::create_dir_all(&src).await.unwrap();
        tokio::fs::write(src.join("file.txt"), b"payload").await.unwrap();
        tokio::fs::create_dir_all(&dst).await.unwrap();
        tokio::fs::write(dst.join("stale.txt"), b"old").await.unwrap();

        move_dir(&src, &dst).await.unwrap();

        assert!(tokio::fs::metadata(&src).await.is_err());
        assert_eq!(tokio::fs::read(dst.join("file.txt")).await.unwrap(), b"payload");
        assert!(tokio::fs::metadata(dst.join("stale.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_move_dir_missing_source_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = move_dir(&tmp.path().join("missing"), &tmp.path().join("dst"))
            .await
            .unwrap_err();
        match err {
            TaskError::Fs { kind, .. } => assert_eq!(kind, FsErrorKind::NotFound),
            other => panic!("expected fs error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_search_fallback_recovers_from_sibling() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("in_progress/T1");
        let stray = tmp.path().join("blocked/T1");
        let dst = tmp.path().join("completed/T1");
        tokio::fs::create_dir_all(&stray).await.unwrap();
        tokio::fs::write(stray.join("plan.md"), b"# plan").await.unwrap();

        let outcome = move_dir_or_search(&src, &dst, &[stray.clone()]).await.unwrap();
        assert_eq!(outcome, MoveOutcome::Recovered(stray.clone()));
        assert!(tokio::fs::metadata(dst.join("plan.md")).await.is_ok());
        assert!(tokio::fs::metadata(&stray).await.is_err());
    }

    #[tokio::test]
    async fn test_search_fallback_materializes_empty_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("pending/T1");
        let dst = tmp.path().join("in_progress/T1");

        let outcome = move_dir_or_search(&src, &dst, &[]).await.unwrap();
        assert_eq!(outcome, MoveOutcome::CreatedEmpty);
        assert!(tokio::fs::metadata(&dst).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_move_preserves_nested_structure() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        tokio::fs::create_dir_all(src.join("deep/deeper")).await.unwrap();
        tokio::fs::write(src.join("deep/deeper/leaf.txt"), b"x").await.unwrap();

        let dst = tmp.path().join("dst");
        move_dir(&src, &dst).await.unwrap();
        assert!(tokio::fs::metadata(dst.join("deep/deeper/leaf.txt")).await.is_ok());
    }
}
